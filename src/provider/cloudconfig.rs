//! Collaborators that pick the runner download and render the first-boot
//! payload. Both are handed to the provider at construction time so tests
//! can substitute them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use super::specs::CloudConfigSpec;
use crate::error::{Error, Result};
use crate::params::{BootstrapInstance, OsType, RunnerApplicationDownload};

pub trait ToolFetcher: Send + Sync {
    /// Pick the runner build matching the requested platform.
    fn select(
        &self,
        os_type: OsType,
        os_arch: &str,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload>;
}

pub trait CloudConfigRenderer: Send + Sync {
    /// Render the user-data handed to the instance on first boot.
    fn render(
        &self,
        bootstrap: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        spec: &CloudConfigSpec,
    ) -> Result<String>;
}

/// Matches the naming used by the runner release downloads.
#[derive(Debug, Default)]
pub struct RunnerToolFetcher;

impl ToolFetcher for RunnerToolFetcher {
    fn select(
        &self,
        os_type: OsType,
        os_arch: &str,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload> {
        let os = match os_type {
            OsType::Linux => "linux",
            OsType::Windows => "win",
            OsType::Unknown => "",
        };
        let arch = match os_arch {
            "amd64" => "x64",
            "arm64" => "arm64",
            "arm" => "arm",
            _ => "",
        };

        tools
            .iter()
            .find(|tool| !os.is_empty() && tool.os == os && !arch.is_empty() && tool.architecture == arch)
            .cloned()
            .ok_or_else(|| Error::Tools {
                os: os_type.to_string(),
                arch: os_arch.to_string(),
            })
    }
}

const RUNNER_HOME: &str = "/home/runner/actions-runner";
const INSTALL_SCRIPT_PATH: &str = "/usr/local/bin/garm-install-runner";
const PRE_INSTALL_DIR: &str = "/garm-pre-install";

/// Minimal renderer: a `#cloud-config` document for Linux guests and a
/// PowerShell script for Windows guests.
#[derive(Debug, Default)]
pub struct DefaultCloudConfig;

impl CloudConfigRenderer for DefaultCloudConfig {
    fn render(
        &self,
        bootstrap: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        spec: &CloudConfigSpec,
    ) -> Result<String> {
        match bootstrap.os_type {
            OsType::Windows => Ok(windows_script(bootstrap, tools, spec)),
            _ => linux_cloud_config(bootstrap, tools, spec),
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Variables exported to the install script, extra context last.
fn install_env(
    bootstrap: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    spec: &CloudConfigSpec,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("RUNNER_NAME".to_string(), bootstrap.name.clone()),
        ("REPO_URL".to_string(), bootstrap.repo_url.clone()),
        ("CALLBACK_URL".to_string(), bootstrap.callback_url.clone()),
        ("METADATA_URL".to_string(), bootstrap.metadata_url.clone()),
        ("BEARER_TOKEN".to_string(), bootstrap.instance_token.clone()),
        ("RUNNER_LABELS".to_string(), bootstrap.labels.join(",")),
        ("DOWNLOAD_URL".to_string(), tools.download_url.clone()),
        ("FILENAME".to_string(), tools.filename.clone()),
    ];
    if let Some(token) = &tools.temp_download_token {
        env.push(("TEMP_TOKEN".to_string(), token.clone()));
    }
    env.extend(
        spec.extra_context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    env
}

fn linux_install_script(
    bootstrap: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    spec: &CloudConfigSpec,
) -> Vec<u8> {
    let mut script = String::from("#!/bin/bash\nset -e\n");
    if bootstrap.user_data_options.enable_boot_debug {
        script.push_str("set -x\n");
    }
    for (key, value) in install_env(bootstrap, tools, spec) {
        script.push_str(&format!("export {key}={}\n", shell_quote(&value)));
    }

    if !spec.runner_install_template.is_empty() {
        // The pool supplies its own installer; run it with the exported env.
        script.push_str("cat > /tmp/garm-runner-install <<'GARM_EOF'\n");
        script.push_str(&String::from_utf8_lossy(&spec.runner_install_template));
        script.push_str("\nGARM_EOF\nchmod +x /tmp/garm-runner-install\nexec /tmp/garm-runner-install\n");
        return script.into_bytes();
    }

    script.push_str(&format!(
        "mkdir -p {RUNNER_HOME}\n\
         curl -fsSL -o \"{RUNNER_HOME}/$FILENAME\" \"$DOWNLOAD_URL\"\n\
         tar xzf \"{RUNNER_HOME}/$FILENAME\" -C {RUNNER_HOME}\n\
         cd {RUNNER_HOME}\n\
         ./bin/installdependencies.sh || true\n"
    ));
    script.into_bytes()
}

fn linux_cloud_config(
    bootstrap: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    spec: &CloudConfigSpec,
) -> Result<String> {
    let options = &bootstrap.user_data_options;

    let mut packages = vec!["curl".to_string(), "tar".to_string()];
    packages.extend(options.extra_packages.iter().cloned());

    let mut write_files = Vec::new();
    let mut runcmd = Vec::new();
    for (name, script) in &spec.pre_install_scripts {
        let path = format!("{PRE_INSTALL_DIR}/{name}");
        write_files.push(json!({
            "path": path,
            "permissions": "0755",
            "encoding": "b64",
            "content": STANDARD.encode(script),
        }));
        runcmd.push(json!([path]));
    }
    write_files.push(json!({
        "path": INSTALL_SCRIPT_PATH,
        "permissions": "0755",
        "encoding": "b64",
        "content": STANDARD.encode(linux_install_script(bootstrap, tools, spec)),
    }));
    runcmd.push(json!([INSTALL_SCRIPT_PATH]));

    let document = json!({
        "package_upgrade": !options.disable_updates_on_boot,
        "packages": packages,
        "ssh_authorized_keys": bootstrap.ssh_keys,
        "write_files": write_files,
        "runcmd": runcmd,
    });

    // JSON is a subset of YAML, so the document is a valid cloud-config.
    Ok(format!(
        "#cloud-config\n{}",
        serde_json::to_string_pretty(&document)?
    ))
}

fn windows_script(
    bootstrap: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    spec: &CloudConfigSpec,
) -> String {
    let mut script = String::from("$ErrorActionPreference = 'Stop'\n");
    if bootstrap.user_data_options.enable_boot_debug {
        script.push_str("Set-PSDebug -Trace 1\n");
    }
    for (key, value) in install_env(bootstrap, tools, spec) {
        script.push_str(&format!("$env:{key} = {}\n", powershell_quote(&value)));
    }

    if !spec.runner_install_template.is_empty() {
        script.push_str(&String::from_utf8_lossy(&spec.runner_install_template));
        script.push('\n');
        return script;
    }

    script.push_str(
        "$runnerDir = 'C:\\actions-runner'\n\
         New-Item -ItemType Directory -Force -Path $runnerDir | Out-Null\n\
         $archive = Join-Path $env:TEMP $env:FILENAME\n\
         Invoke-WebRequest -UseBasicParsing -Uri $env:DOWNLOAD_URL -OutFile $archive\n\
         Expand-Archive -Force -Path $archive -DestinationPath $runnerDir\n",
    );
    script
}
