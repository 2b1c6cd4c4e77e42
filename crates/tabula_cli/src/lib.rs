//! Command-line front end for `tabula_core`.
//!
//! # Responsibility
//! - Parse `<CONFIG> [--log-dir <DIR>] [--level <LEVEL>]`.
//! - Boot an `AppContext`, resolve every database, and report one line per
//!   database and per role.

use clap::Parser;
use log::info;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use tabula_core::{
    default_log_level, init_logging, AppContext, Backend, Catalog, DatabasesConfig, SqlLocation,
};

/// Resolve every configured database and report roles and processors.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "tabula_cli")]
#[command(version)]
pub struct CliArgs {
    /// Databases configuration file (JSON)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Absolute directory for rotating log files; logging is off without it
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log level filter
    #[arg(long, default_value = default_log_level())]
    pub level: String,
}

/// Parses a full argument list, program name first.
pub fn parse_args<I, T>(args: I) -> Result<CliArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CliArgs::try_parse_from(args)
}

/// Boots from `args.config` and writes the resolution report to `out`.
pub fn run(args: &CliArgs, out: &mut impl Write) -> Result<(), String> {
    if let Some(dir) = &args.log_dir {
        init_logging(&args.level, dir).map_err(|err| err.to_string())?;
    }

    let config = DatabasesConfig::load(&args.config).map_err(|err| err.to_string())?;
    let app = AppContext::boot(&config, &Catalog::with_defaults()).map_err(|err| err.to_string())?;
    let databases = app.databases();

    for name in databases.names() {
        let database = databases.get(&name).map_err(|err| err.to_string())?;
        let target = match database.backend() {
            Backend::Sql(sql) => match sql.location() {
                SqlLocation::Memory => "sqlite::memory".to_string(),
                SqlLocation::File(path) => format!("sqlite:{}", path.display()),
            },
            Backend::Storage(storage) => storage.kind().to_string(),
        };
        writeln!(
            out,
            "database={} kind={} target={}",
            name,
            database.kind(),
            target
        )
        .map_err(|err| err.to_string())?;
    }

    for (role, name) in databases.defaults() {
        writeln!(out, "role={role} database={name}").map_err(|err| err.to_string())?;
    }
    writeln!(out, "processors={}", app.processors().names().join(","))
        .map_err(|err| err.to_string())?;

    info!(
        "event=cli_report module=cli status=ok config={} databases={}",
        args.config.display(),
        databases.names().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_args;
    use clap::error::ErrorKind;
    use std::path::PathBuf;
    use tabula_core::default_log_level;

    #[test]
    fn parses_flags_in_any_position() {
        let args = parse_args([
            "tabula_cli",
            "--level",
            "warn",
            "db.json",
            "--log-dir",
            "/tmp/logs",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("db.json"));
        assert_eq!(args.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(args.level, "warn");
    }

    #[test]
    fn level_defaults_to_build_profile() {
        let args = parse_args(["tabula_cli", "db.json"]).unwrap();
        assert_eq!(args.level, default_log_level());
        assert_eq!(args.log_dir, None);
    }

    #[test]
    fn rejects_missing_or_extra_arguments() {
        let kind = |args: &[&str]| parse_args(args.iter().copied()).unwrap_err().kind();
        assert_eq!(
            kind(&["tabula_cli"]),
            ErrorKind::MissingRequiredArgument
        );
        assert_eq!(
            kind(&["tabula_cli", "a.json", "b.json"]),
            ErrorKind::UnknownArgument
        );
        assert_eq!(
            kind(&["tabula_cli", "a.json", "--level"]),
            ErrorKind::InvalidValue
        );
        assert_eq!(
            kind(&["tabula_cli", "a.json", "--verbose"]),
            ErrorKind::UnknownArgument
        );
    }
}
