use crate::prompt::InputSource;
use crate::Result;
use chrono::Local;
use log::{error, info, warn, Level};
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log target whose records are tagged `SUCCESS` in the consolidated log.
pub const SUCCESS_TARGET: &str = "success";

pub struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

pub fn level_tag(level: Level, target: &str) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info if target == SUCCESS_TARGET => "SUCCESS",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

pub fn format_line(timestamp: &str, tag: &str, message: &dyn Display) -> String {
    format!("[{}] [{}] {}", timestamp, tag, message)
}

/// Installs the global logger. Records go to stderr and, when `log_file`
/// can be opened, are appended to it as well. A log file that cannot be
/// opened only disables the file side.
pub fn init_logging(log_file: Option<&Path>) {
    let mut writers: Vec<Box<dyn Write + Send + Sync>> = vec![Box::new(std::io::stderr())];
    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => writers.push(Box::new(file)),
            Err(e) => eprintln!(
                "Cannot write log file {}: {}. Logging to the console only.",
                path.display(),
                e
            ),
        }
    }

    let env = env_logger::Env::default().default_filter_or("info");
    let result = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(
                    &Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                    level_tag(record.level(), record.target()),
                    record.args(),
                )
            )
        })
        .target(env_logger::Target::Pipe(Box::new(MultiWriter { writers })))
        .try_init();
    if let Err(e) = result {
        eprintln!("Logger already initialised: {}", e);
    }
}

pub fn log_success<T: Display, U: Display>(operation: T, target: U) {
    info!(target: SUCCESS_TARGET, "Successfully {}: {}", operation, target);
}

pub fn log_failure<T: Display, U: Display, E: Display>(operation: T, target: U, error: &E) {
    error!("Failed to {}: {}. Error: {}", operation, target, error);
}

pub fn log_skipped<T: Display, U: Display>(operation: T, target: U, reason: &str) {
    warn!("Skipped {} for {}: {}", operation, target, reason);
}

/// What to do with a log file that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingLog {
    Overwrite,
    Rename,
    Append,
}

pub fn default_log_name(prefix: &str, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

/// Turns an operator answer into a file path. Empty keeps the default name
/// in `cwd`; an existing directory or a path ending in a separator gets the
/// default name inside it; anything else is taken as the full path.
pub fn interpret_path_answer(answer: &str, cwd: &Path, default_name: &str) -> PathBuf {
    let answer = answer.trim().trim_matches('"');
    if answer.is_empty() {
        return cwd.join(default_name);
    }
    let candidate = PathBuf::from(answer);
    let candidate = if candidate.is_absolute() {
        candidate
    } else {
        cwd.join(candidate)
    };
    if candidate.is_dir() || answer.ends_with('/') || answer.ends_with('\\') {
        candidate.join(default_name)
    } else {
        candidate
    }
}

/// Picks a name next to `path` that does not exist yet.
pub fn renamed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "log".to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    (1..)
        .map(|n| parent.join(format!("{}_{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn choose_existing(input: &mut dyn InputSource, path: &Path) -> ExistingLog {
    if !input.is_interactive() {
        return ExistingLog::Append;
    }
    input.message(&format!("{} already exists.", path.display()));
    loop {
        let Some(answer) = input.read_line("[O]verwrite, [R]ename or [A]ppend? [A]: ") else {
            return ExistingLog::Append;
        };
        match answer.trim().to_ascii_lowercase().as_str() {
            "" | "a" | "append" => return ExistingLog::Append,
            "o" | "overwrite" => return ExistingLog::Overwrite,
            "r" | "rename" => return ExistingLog::Rename,
            other => input.message(&format!("Invalid selection: '{}'", other)),
        }
    }
}

/// Archives cannot be appended to; the safe default is a fresh name.
fn choose_existing_archive(input: &mut dyn InputSource, path: &Path) -> ExistingLog {
    if !input.is_interactive() {
        return ExistingLog::Rename;
    }
    input.message(&format!("{} already exists.", path.display()));
    loop {
        let Some(answer) = input.read_line("[O]verwrite or [R]ename? [R]: ") else {
            return ExistingLog::Rename;
        };
        match answer.trim().to_ascii_lowercase().as_str() {
            "" | "r" | "rename" => return ExistingLog::Rename,
            "o" | "overwrite" => return ExistingLog::Overwrite,
            other => input.message(&format!("Invalid selection: '{}'", other)),
        }
    }
}

/// Picks the file location (prompting when nothing was requested) and
/// creates its parent directories.
fn prepare_path(
    input: &mut dyn InputSource,
    requested: Option<&Path>,
    cwd: &Path,
    default_name: &str,
    label: &str,
) -> Result<PathBuf> {
    let path = match requested {
        Some(path) => interpret_path_answer(&path.to_string_lossy(), cwd, default_name),
        None if input.is_interactive() => {
            let answer = input
                .read_line(&format!(
                    "{} location [{}]: ",
                    label,
                    cwd.join(default_name).display()
                ))
                .unwrap_or_default();
            interpret_path_answer(&answer, cwd, default_name)
        }
        None => cwd.join(default_name),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(path)
}

fn apply_choice(path: PathBuf, choice: ExistingLog) -> Result<PathBuf> {
    match choice {
        ExistingLog::Append => Ok(path),
        ExistingLog::Overwrite => {
            std::fs::File::create(&path)?;
            Ok(path)
        }
        ExistingLog::Rename => Ok(renamed_path(&path)),
    }
}

/// Resolves where the consolidated log goes.
///
/// `requested` skips the location prompt. Parent directories are created.
/// An existing file is overwritten (truncated), renamed around or appended
/// to per the operator's answer; forced mode appends.
pub fn resolve_log_path(
    input: &mut dyn InputSource,
    requested: Option<&Path>,
    cwd: &Path,
    default_name: &str,
) -> Result<PathBuf> {
    let path = prepare_path(input, requested, cwd, default_name, "Log file")?;
    if !path.exists() {
        return Ok(path);
    }
    let choice = choose_existing(input, &path);
    apply_choice(path, choice)
}

/// Same as [`resolve_log_path`] for the diagnostics archive, except an
/// existing archive is never appended to: the operator picks overwrite or
/// rename, and forced mode renames.
pub fn resolve_archive_path(
    input: &mut dyn InputSource,
    requested: Option<&Path>,
    cwd: &Path,
    default_name: &str,
) -> Result<PathBuf> {
    let path = prepare_path(input, requested, cwd, default_name, "Archive")?;
    if !path.exists() {
        return Ok(path);
    }
    let choice = choose_existing_archive(input, &path);
    apply_choice(path, choice)
}

/// Resolves the log path and installs the logger. When the file cannot be
/// prepared the run goes on with console logging and `None` is returned.
pub fn open_run_log(
    input: &mut dyn InputSource,
    requested: Option<&Path>,
    cwd: &Path,
    default_name: &str,
) -> Option<PathBuf> {
    match resolve_log_path(input, requested, cwd, default_name) {
        Ok(path) => {
            init_logging(Some(&path));
            Some(path)
        }
        Err(e) => {
            eprintln!("Warning: log file unavailable ({}). {}", e, e.hint());
            init_logging(None);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{NonInteractive, ScriptedInput};

    #[test]
    fn test_line_format() {
        let line = format_line("2024-05-01 10:00:00", level_tag(Level::Warn, "arcprep"), &"late");
        assert_eq!(line, "[2024-05-01 10:00:00] [WARNING] late");
        assert_eq!(level_tag(Level::Info, SUCCESS_TARGET), "SUCCESS");
        assert_eq!(level_tag(Level::Info, "arcprep::checks"), "INFO");
    }

    #[test]
    fn test_default_path_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = ScriptedInput::new([""]);
        let path = resolve_log_path(&mut input, None, dir.path(), "run.log").unwrap();
        assert_eq!(path, dir.path().join("run.log"));
    }

    #[test]
    fn test_directory_answer_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("arc");
        let answer = format!("{}/", nested.display());
        let mut input = ScriptedInput::new([answer]);
        let path = resolve_log_path(&mut input, None, dir.path(), "run.log").unwrap();
        assert_eq!(path, nested.join("run.log"));
        assert!(nested.is_dir());
    }

    #[test]
    fn test_existing_file_choices() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("run.log");
        std::fs::write(&existing, "old\n").unwrap();

        let mut forced = NonInteractive;
        let path = resolve_log_path(&mut forced, Some(&existing), dir.path(), "x.log").unwrap();
        assert_eq!(path, existing);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "old\n");

        let mut rename = ScriptedInput::new(["r"]);
        let path = resolve_log_path(&mut rename, Some(&existing), dir.path(), "x.log").unwrap();
        assert_eq!(path, dir.path().join("run_1.log"));

        let mut overwrite = ScriptedInput::new(["?", "o"]);
        let path = resolve_log_path(&mut overwrite, Some(&existing), dir.path(), "x.log").unwrap();
        assert_eq!(path, existing);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "");
        assert_eq!(overwrite.prompts.len(), 2);
    }

    #[test]
    fn test_existing_archive_is_never_appended() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("logs.zip");
        std::fs::write(&existing, "PK").unwrap();

        let mut forced = NonInteractive;
        let path = resolve_archive_path(&mut forced, Some(&existing), dir.path(), "x.zip").unwrap();
        assert_eq!(path, dir.path().join("logs_1.zip"));

        let mut prompted = ScriptedInput::new(["a", ""]);
        let path =
            resolve_archive_path(&mut prompted, Some(&existing), dir.path(), "x.zip").unwrap();
        assert_eq!(path, dir.path().join("logs_1.zip"));
        assert_eq!(prompted.prompts.len(), 2);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "PK");
    }

    #[test]
    fn test_unusable_log_location_keeps_the_run_going() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let requested = blocker.join("sub").join("run.log");

        let mut forced = NonInteractive;
        assert!(resolve_log_path(&mut forced, Some(&requested), dir.path(), "x.log").is_err());
        assert_eq!(
            open_run_log(&mut forced, Some(&requested), dir.path(), "x.log"),
            None
        );
    }

    #[test]
    fn test_default_log_name_shape() {
        let name = default_log_name("ArcPrereqCheck", "log");
        assert!(name.starts_with("ArcPrereqCheck_"));
        assert!(name.ends_with(".log"));
    }
}
