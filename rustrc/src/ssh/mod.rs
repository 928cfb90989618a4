use crate::client::{Command, CommandOutput, Config, Session};

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PrivateKeyWithHashAlg;
use russh_keys::load_secret_key;
use russh_keys::ssh_key::public::PublicKey;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::{lookup_host, ToSocketAddrs},
    time::Duration,
};

/// Extended data stream number used for stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

pub struct SSHSession {
    session: client::Handle<Handler>,
    command_timeout: Duration,
}

/// Configuration for an SSH session
///
/// SSHConfig::Key is used to authenticate with a private key
/// SSHConfig::Password is used to authenticate with a password
#[derive(Clone)]
pub enum SSHConfig {
    Key {
        username: String,
        socket: SocketAddr,
        key_path: PathBuf,
        inactivity_timeout: Duration,
    },
    Password {
        username: String,
        socket: SocketAddr,
        password: String,
        inactivity_timeout: Duration,
    },
}

impl std::fmt::Debug for SSHConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SSHConfig::Key {
                username, socket, ..
            } => write!(f, "SSHConfig::Key({}@{})", username, socket),
            SSHConfig::Password {
                username, socket, ..
            } => write!(f, "SSHConfig::Password({}@{})", username, socket),
        }
    }
}

impl SSHConfig {
    pub async fn key<U: Into<String>, S: ToSocketAddrs, P: Into<PathBuf>>(
        username: U,
        socket: S,
        key_path: P,
        inactivity_timeout: Duration,
    ) -> crate::Result<Self> {
        Ok(SSHConfig::Key {
            username: username.into(),
            socket: resolve(socket).await?,
            key_path: key_path.into(),
            inactivity_timeout,
        })
    }

    pub async fn password<U: Into<String>, S: ToSocketAddrs, P: Into<String>>(
        username: U,
        password: P,
        socket: S,
        inactivity_timeout: Duration,
    ) -> crate::Result<Self> {
        Ok(SSHConfig::Password {
            username: username.into(),
            socket: resolve(socket).await?,
            password: password.into(),
            inactivity_timeout,
        })
    }

    fn inactivity_timeout(&self) -> Duration {
        match self {
            SSHConfig::Key {
                inactivity_timeout, ..
            }
            | SSHConfig::Password {
                inactivity_timeout, ..
            } => *inactivity_timeout,
        }
    }
}

async fn resolve<S: ToSocketAddrs>(socket: S) -> crate::Result<SocketAddr> {
    lookup_host(socket)
        .await?
        .next()
        .ok_or_else(|| crate::Error::ConnectionError("Error Parsing Socket".to_string()))
}

impl SSHSession {
    async fn run(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        let mut channel = self.session.channel_open_session().await?;

        let command: Vec<u8> = cmd.into();
        channel.exec(true, command).await?;

        let mut output = CommandOutput::default();

        while let Some(msg) = channel.wait().await {
            match msg {
                russh::ChannelMsg::Data { ref data } => {
                    output.stdout.extend_from_slice(data);
                }
                russh::ChannelMsg::ExtendedData { ref data, ext }
                    if ext == SSH_EXTENDED_DATA_STDERR =>
                {
                    output.stderr.extend_from_slice(data);
                }
                russh::ChannelMsg::ExitStatus { exit_status } => {
                    output.status_code = Some(exit_status);
                }
                _ => {}
            }
        }

        Ok(output)
    }
}

impl Session for SSHSession {
    async fn disconnect(&mut self) -> crate::Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }

    /// Execute a command on the remote host
    async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        let limit = cmd.get_timeout().unwrap_or(self.command_timeout);
        match tokio::time::timeout(limit, self.run(cmd)).await {
            Ok(result) => result,
            Err(_) => Err(crate::Error::Timeout(limit)),
        }
    }
}

impl Config for SSHConfig {
    type SessionType = SSHSession;

    async fn create_session(&self) -> crate::Result<Self::SessionType> {
        let command_timeout = self.inactivity_timeout();
        match self {
            SSHConfig::Key {
                key_path,
                inactivity_timeout,
                username,
                socket,
            } => {
                let mut session = get_handle(*socket, *inactivity_timeout).await?;

                let key_pair = load_secret_key(key_path, None)?;
                let auth_res = session
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), None)?,
                    )
                    .await?;

                if !auth_res {
                    return Err(crate::Error::AuthenticationError(
                        "Failed to authenticate with public key".to_string(),
                    ));
                }

                Ok(SSHSession {
                    session,
                    command_timeout,
                })
            }
            SSHConfig::Password {
                username,
                socket,
                password,
                inactivity_timeout,
            } => {
                let mut session = get_handle(*socket, *inactivity_timeout).await?;

                let auth_res = session.authenticate_password(username, password).await?;

                if !auth_res {
                    return Err(crate::Error::AuthenticationError(
                        "Failed to authenticate with password".to_string(),
                    ));
                }

                Ok(SSHSession {
                    session,
                    command_timeout,
                })
            }
        }
    }
}

async fn get_handle(
    socket: SocketAddr,
    timeout: Duration,
) -> crate::Result<russh::client::Handle<Handler>> {
    let config = client::Config {
        inactivity_timeout: Some(timeout),
        ..Default::default()
    };

    let handle = client::connect(Arc::new(config), socket, Handler {}).await?;

    Ok(handle)
}

struct Handler {}

#[async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    // Host keys are not pinned; targets come from an operator supplied list.
    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
