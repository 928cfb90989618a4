//! Transport independent command model.
//!
//! A [`Config`] knows how to open a [`Session`] against one target, and a
//! [`Client`] owns the session for as long as commands are being run on it.

use std::fmt;
use std::time::Duration;

/// A command line to run on a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    cmd: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new<S: Into<String>>(cmd: S) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overrides the session's default timeout for this command only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_cmd(&self) -> &str {
        &self.cmd
    }

    pub fn get_args(&self) -> &Vec<String> {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn quote(part: &str) -> String {
    if !part.is_empty() && !part.contains(|c: char| c.is_whitespace() || c == '"') {
        return part.to_string();
    }
    format!("\"{}\"", part.replace('"', "\\\""))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.cmd))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

impl From<&Command> for Vec<u8> {
    fn from(cmd: &Command) -> Self {
        cmd.to_string().into_bytes()
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status_code: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Connection parameters for one target.
#[trait_variant::make(Config: Send)]
pub trait LocalConfig {
    type SessionType: Session;

    async fn create_session(&self) -> crate::Result<Self::SessionType>;
}

/// An open channel to a target that can run commands.
#[trait_variant::make(Session: Send)]
pub trait LocalSession {
    async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput>;

    async fn disconnect(&mut self) -> crate::Result<()>;
}

pub struct Client<C: Config> {
    config: C,
    session: C::SessionType,
}

impl<C: Config> Client<C> {
    pub async fn connect(config: C) -> crate::Result<Self> {
        let session = Config::create_session(&config).await?;
        Ok(Self { config, session })
    }

    pub async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        log::debug!("exec: {}", cmd);
        Session::exec(&self.session, cmd).await
    }

    pub async fn disconnect(&mut self) -> crate::Result<()> {
        Session::disconnect(&mut self.session).await
    }

    pub fn config(&self) -> &C {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = Command::new("azcmagent")
            .arg("check")
            .arg("--location")
            .arg("West Europe");
        assert_eq!(cmd.to_string(), "azcmagent check --location \"West Europe\"");
    }

    #[test]
    fn display_quotes_empty_arguments() {
        let cmd = Command::new("echo").arg("");
        assert_eq!(cmd.to_string(), "echo \"\"");
    }

    struct EchoConfig;

    struct EchoSession {
        closed: bool,
    }

    impl Config for EchoConfig {
        type SessionType = EchoSession;

        async fn create_session(&self) -> crate::Result<Self::SessionType> {
            Ok(EchoSession { closed: false })
        }
    }

    impl Session for EchoSession {
        async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
            if self.closed {
                return Err(crate::Error::ConnectionError("session closed".into()));
            }
            Ok(CommandOutput {
                stdout: cmd.to_string().into_bytes(),
                stderr: Vec::new(),
                status_code: Some(0),
            })
        }

        async fn disconnect(&mut self) -> crate::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn client_runs_commands_until_disconnected() {
        let mut client = Client::connect(EchoConfig).await.unwrap();
        let output = client.exec(&Command::new("show").arg("-j")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "show -j");

        client.disconnect().await.unwrap();
        assert!(client.exec(&Command::new("show")).await.is_err());
    }

    #[test]
    fn output_success_requires_zero_exit() {
        let mut output = CommandOutput::default();
        assert!(!output.success());
        output.status_code = Some(0);
        assert!(output.success());
        output.status_code = Some(3);
        assert!(!output.success());
    }
}
