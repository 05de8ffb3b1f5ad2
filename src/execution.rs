//! External-provider process contract: the command and its arguments come
//! from `GARM_*` environment variables, the bootstrap request from stdin, and
//! the result goes to stdout as JSON.

use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::params::BootstrapInstance;
use crate::provider::LxdProvider;

pub const COMMAND_VAR: &str = "GARM_COMMAND";
pub const CONTROLLER_ID_VAR: &str = "GARM_CONTROLLER_ID";
pub const POOL_ID_VAR: &str = "GARM_POOL_ID";
pub const PROVIDER_CONFIG_FILE_VAR: &str = "GARM_PROVIDER_CONFIG_FILE";
pub const INSTANCE_ID_VAR: &str = "GARM_INSTANCE_ID";

pub const EXIT_NOT_FOUND: i32 = 30;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateInstance,
    DeleteInstance,
    GetInstance,
    ListInstances,
    RemoveAllInstances,
    StartInstance,
    StopInstance,
    GetVersion,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CreateInstance" => Command::CreateInstance,
            "DeleteInstance" => Command::DeleteInstance,
            "GetInstance" => Command::GetInstance,
            "ListInstances" => Command::ListInstances,
            "RemoveAllInstances" => Command::RemoveAllInstances,
            "StartInstance" => Command::StartInstance,
            "StopInstance" => Command::StopInstance,
            "GetVersion" => Command::GetVersion,
            other => return Err(Error::Validation(format!("invalid command {other}"))),
        })
    }
}

impl Command {
    fn needs_instance_id(self) -> bool {
        matches!(
            self,
            Command::DeleteInstance
                | Command::GetInstance
                | Command::StartInstance
                | Command::StopInstance
        )
    }

    fn needs_pool_id(self) -> bool {
        matches!(self, Command::CreateInstance | Command::ListInstances)
    }
}

/// Everything one invocation was asked to do.
#[derive(Debug, Clone)]
pub struct Environment {
    pub command: Command,
    pub controller_id: String,
    pub pool_id: String,
    pub provider_config_file: PathBuf,
    pub instance_id: String,
    pub bootstrap: Option<BootstrapInstance>,
}

impl Environment {
    /// Read the invocation from the process environment and stdin.
    pub fn from_process() -> Result<Self> {
        let mut env = Self::from_vars(|key| std::env::var(key).ok())?;
        if env.command == Command::CreateInstance {
            env.read_bootstrap(std::io::stdin().lock())?;
        }
        env.validate()?;
        Ok(env)
    }

    /// Decode the `GARM_*` variables through `lookup`. The result is not
    /// validated yet.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).unwrap_or_default();

        let command = get(COMMAND_VAR);
        if command.is_empty() {
            return Err(Error::Validation(format!("missing {COMMAND_VAR}")));
        }

        Ok(Self {
            command: command.parse()?,
            controller_id: get(CONTROLLER_ID_VAR),
            pool_id: get(POOL_ID_VAR),
            provider_config_file: PathBuf::from(get(PROVIDER_CONFIG_FILE_VAR)),
            instance_id: get(INSTANCE_ID_VAR),
            bootstrap: None,
        })
    }

    pub fn read_bootstrap(&mut self, mut input: impl Read) -> Result<()> {
        let mut data = String::new();
        input.read_to_string(&mut data)?;
        if data.trim().is_empty() {
            return Err(Error::Validation("missing bootstrap params".to_string()));
        }
        self.bootstrap = Some(serde_json::from_str(&data)?);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let missing = |var: &str| -> Result<()> { Err(Error::Validation(format!("missing {var}"))) };

        if self.command == Command::GetVersion {
            return Ok(());
        }
        if self.provider_config_file.as_os_str().is_empty() {
            return missing(PROVIDER_CONFIG_FILE_VAR);
        }
        if self.controller_id.is_empty() {
            return missing(CONTROLLER_ID_VAR);
        }
        if self.command.needs_pool_id() && self.pool_id.is_empty() {
            return missing(POOL_ID_VAR);
        }
        if self.command.needs_instance_id() && self.instance_id.is_empty() {
            return missing(INSTANCE_ID_VAR);
        }
        if self.command == Command::CreateInstance && self.bootstrap.is_none() {
            return Err(Error::Validation("missing bootstrap params".to_string()));
        }
        Ok(())
    }
}

/// Run the requested command and return what should be printed on stdout.
pub async fn run(
    provider: &LxdProvider,
    env: &Environment,
    cancel: &CancellationToken,
) -> Result<String> {
    let output = match env.command {
        Command::CreateInstance => {
            let bootstrap = env
                .bootstrap
                .as_ref()
                .ok_or_else(|| Error::Validation("missing bootstrap params".to_string()))?;
            let instance = provider.create_instance(bootstrap, cancel).await?;
            serde_json::to_string(&instance)?
        }
        Command::GetInstance => {
            let instance = provider.get_instance(&env.instance_id, cancel).await?;
            serde_json::to_string(&instance)?
        }
        Command::ListInstances => {
            let instances = provider.list_instances(&env.pool_id, cancel).await?;
            serde_json::to_string(&instances)?
        }
        Command::DeleteInstance => {
            provider.delete_instance(&env.instance_id, cancel).await?;
            String::new()
        }
        Command::RemoveAllInstances => {
            provider.remove_all_instances(cancel).await?;
            String::new()
        }
        Command::StartInstance => {
            provider.start(&env.instance_id, cancel).await?;
            String::new()
        }
        Command::StopInstance => {
            provider.stop(&env.instance_id, false, cancel).await?;
            String::new()
        }
        Command::GetVersion => version().to_string(),
    };
    Ok(output)
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Process exit code for a failed invocation.
pub fn exit_code(err: &Error) -> i32 {
    if err.is_not_found() {
        EXIT_NOT_FOUND
    } else {
        EXIT_FAILURE
    }
}
