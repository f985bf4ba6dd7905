use std::path::PathBuf;
use structopt::StructOpt;

use ssm_manager::auth::default_role_session_name;
use ssm_manager::AuthConfig;

#[derive(StructOpt, Debug)]
#[structopt(name = "ssm_manager",
    about = "AWS Parameter Store Manager - Bulk upload, list, get and delete SSM Parameters, written in Rust."
)]
pub struct Opt {
    /// Authentication Method
    #[structopt(short = "a", long = "auth-method", default_value = "default",
        possible_values = &["access-key", "profile", "sso", "role", "environment", "default"])]
    pub auth_method: String,
    /// AWS Access Key ID (access-key)
    #[structopt(long = "access-key", env = "SSM_MANAGER_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,
    /// AWS Secret Access Key (access-key)
    #[structopt(long = "secret-key", env = "SSM_MANAGER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// AWS Session Token (access-key)
    #[structopt(long = "session-token", env = "SSM_MANAGER_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,
    /// Profile Name (profile)
    #[structopt(short = "p", long = "profile", default_value = "default")]
    pub profile: String,
    /// SSO Start URL (sso)
    #[structopt(long = "sso-start-url")]
    pub sso_start_url: Option<String>,
    /// SSO Region (sso)
    #[structopt(long = "sso-region")]
    pub sso_region: Option<String>,
    /// SSO Account ID (sso)
    #[structopt(long = "sso-account-id")]
    pub sso_account_id: Option<String>,
    /// SSO Role Name (sso)
    #[structopt(long = "sso-role-name")]
    pub sso_role_name: Option<String>,
    /// Role ARN to Assume (role)
    #[structopt(long = "role-arn")]
    pub role_arn: Option<String>,
    /// Role Session Name (role), aws-parameter-store-<pid> if not present
    #[structopt(long = "role-session-name")]
    pub role_session_name: Option<String>,
    /// External ID (role)
    #[structopt(long = "external-id")]
    pub external_id: Option<String>,
    /// MFA Device Serial Number or ARN (role)
    #[structopt(long = "mfa-serial")]
    pub mfa_serial: Option<String>,
    /// MFA Token Code (role)
    #[structopt(long = "mfa-token")]
    pub mfa_token: Option<String>,
    /// AWS Region, overrides environment and profile
    #[structopt(short = "r", long = "region")]
    pub region: Option<String>,
    /// Region used when no other source names one
    #[structopt(long = "default-region", default_value = "us-east-1")]
    pub default_region: String,
    /// Default KMS Key for SecureString Parameters
    #[structopt(long = "kms-key", default_value = "alias/aws/ssm")]
    pub kms_key: String,
    /// Per-call Timeout in Seconds
    #[structopt(long = "timeout", default_value = "30")]
    pub timeout: u64,
    /// Quiet Mode => Only Errors and Parameter Output
    #[structopt(short = "q", long = "quiet")]
    pub quiet: bool,
    /// Verbose Mode => Debug Logging
    #[structopt(short = "v", long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Upload Parameters from a CSV file (key,value,type[,tier][,kms])
    #[structopt(name = "upload", visible_alias = "u")]
    Upload {
        /// Input CSV file
        #[structopt(parse(from_os_str))]
        csv: PathBuf,
        /// Overwrite Existing Parameters without asking
        #[structopt(short = "o", long = "overwrite", conflicts_with = "skip-existing")]
        overwrite: bool,
        /// Skip Existing Parameters without asking
        #[structopt(name = "skip-existing", short = "s", long = "skip-existing")]
        skip_existing: bool,
    },
    /// List All Parameters
    #[structopt(name = "list", visible_alias = "la")]
    List {
        /// Don't Decrypt SecureString Values
        #[structopt(long = "no-decrypt")]
        no_decrypt: bool,
        /// Only keys containing this text (case-insensitive)
        #[structopt(short = "f", long = "filter")]
        filter: Option<String>,
        /// Export to CSV file instead of printing
        #[structopt(short = "o", long = "output", parse(from_os_str))]
        output: Option<PathBuf>,
    },
    /// Get Parameter by Name
    #[structopt(name = "get", visible_alias = "g")]
    Get {
        /// Parameter Name
        key: String,
        /// Don't Decrypt SecureString Values
        #[structopt(long = "no-decrypt")]
        no_decrypt: bool,
    },
    /// Delete Parameter by Name
    #[structopt(name = "delete", visible_alias = "d")]
    Delete {
        /// Parameter Name
        key: String,
        /// Don't ask for confirmation
        #[structopt(long = "force")]
        force: bool,
    },
    /// List Profiles found in the AWS config and credentials files
    #[structopt(name = "list-profiles", visible_alias = "lp")]
    ListProfiles,
}

fn required(value: &Option<String>, flag: &str, method: &str) -> Result<String, String> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| format!("--{} is required for --auth-method {}", flag, method))
}

impl Opt {
    /// Builds the auth config the selected method needs from the flags.
    pub fn auth_config(&self) -> Result<AuthConfig, String> {
        let region = self.region.clone();
        let method = self.auth_method.as_str();
        let config = match method {
            "access-key" => AuthConfig::AccessKey {
                access_key_id: required(&self.access_key, "access-key", method)?,
                secret_access_key: required(&self.secret_key, "secret-key", method)?,
                session_token: self.session_token.clone(),
                region,
            },
            "profile" => AuthConfig::Profile { name: self.profile.clone(), region },
            "sso" => AuthConfig::Sso {
                start_url: required(&self.sso_start_url, "sso-start-url", method)?,
                sso_region: required(&self.sso_region, "sso-region", method)?,
                account_id: required(&self.sso_account_id, "sso-account-id", method)?,
                role_name: required(&self.sso_role_name, "sso-role-name", method)?,
                region,
            },
            "role" => AuthConfig::AssumeRole {
                role_arn: required(&self.role_arn, "role-arn", method)?,
                session_name: self.role_session_name.clone().unwrap_or_else(default_role_session_name),
                external_id: self.external_id.clone(),
                mfa_serial: self.mfa_serial.clone(),
                mfa_token: self.mfa_token.clone(),
                region,
            },
            "environment" => AuthConfig::Environment { region },
            "default" => AuthConfig::DefaultChain { region },
            other => return Err(format!("unknown auth method '{}'", other)),
        };
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssm_manager::AuthMethod;

    fn opt(args: &[&str]) -> Opt {
        let mut argv = vec!["ssm_manager"];
        argv.extend_from_slice(args);
        Opt::from_iter_safe(argv).unwrap()
    }

    #[test]
    fn defaults_to_provider_chain() {
        let options = opt(&["list"]);
        assert_eq!(options.auth_config().unwrap().method(), AuthMethod::DefaultChain);
        assert_eq!(options.default_region, "us-east-1");
        assert_eq!(options.timeout, 30);
    }

    #[test]
    fn access_key_needs_both_halves() {
        let options = opt(&["--auth-method", "access-key", "--access-key", "AKID", "get", "/a"]);
        assert!(options.auth_config().unwrap_err().contains("--secret-key"));
    }

    #[test]
    fn role_flags_map_to_assume_role() {
        let options = opt(&[
            "-a", "role", "--role-arn", "arn:aws:iam::123456789012:role/deploy", "--mfa-serial", "arn:mfa", "-r",
            "eu-west-1", "delete", "/a", "--force",
        ]);
        match options.auth_config().unwrap() {
            AuthConfig::AssumeRole { role_arn, session_name, mfa_serial, region, .. } => {
                assert_eq!(role_arn, "arn:aws:iam::123456789012:role/deploy");
                assert!(session_name.starts_with("aws-parameter-store-"));
                assert_eq!(mfa_serial.as_deref(), Some("arn:mfa"));
                assert_eq!(region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn upload_modes_conflict() {
        let argv = vec!["ssm_manager", "upload", "params.csv", "--overwrite", "--skip-existing"];
        assert!(Opt::from_iter_safe(argv).is_err());
    }

    #[test]
    fn aliases() {
        assert!(matches!(opt(&["la", "--filter", "db"]).cmd, Command::List { .. }));
        assert!(matches!(opt(&["g", "/a"]).cmd, Command::Get { .. }));
    }
}
