use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use failure::{err_msg, Error};
use structopt::clap::ErrorKind;
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::*;
use ssm_manager::auth::{profiles, AwsSources};
use ssm_manager::conflict::parse_answer;
use ssm_manager::ssm_parameters::{key_matches, ParameterType};
use ssm_manager::{
    sync, tabular, AlwaysOverwrite, AlwaysSkip, ClientConfig, ConflictDecision, Interactive, ParameterClient,
    ParameterRecord, RemoteParameter, Resolver, SSMConnector, SessionCache, SyncAction, SyncReport,
};

mod args;

/// AWS SSM Parameter Manager
/// Command Line
/// --auth-method, -a => access-key | profile | sso | role | environment | default
/// --region, -r => Region for every call, --default-region when nothing else names one
/// --quiet / --verbose => warn / debug logging on stderr, RUST_LOG wins if set
/// upload, u CSV [--overwrite | --skip-existing] => Sync parameters from CSV, asks per existing key otherwise
/// list, la [--no-decrypt] [--filter F] [--output FILE] => JSON lines, or CSV export with --output
/// get, g KEY => Parameter with tier, KMS key and last modified, as JSON
/// delete KEY [--force] => Delete after confirmation
/// list-profiles, lp => Profiles in the shared config and credentials files
fn main() {
    let clap_options = Opt::clap().get_matches_safe();

    let matches = match clap_options {
        Ok(matches) => matches,
        Err(err) => {
            println!("{}", err.message);
            match err.kind {
                ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => process::exit(0),
                _ => process::exit(1),
            }
        }
    };
    let options = Opt::from_clap(&matches);
    init_logging(&options);

    if let Err(err) = run(options) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn init_logging(options: &Opt) {
    let level = if options.verbose {
        "debug"
    } else if options.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(options.verbose)
        .with_writer(io::stderr)
        .init();
}

fn run(options: Opt) -> Result<(), Error> {
    if let Command::ListProfiles = options.cmd {
        profiles::list_profiles()?.iter().for_each(|p| println!("{}", p));
        return Ok(());
    }

    let auth = options.auth_config().map_err(err_msg)?;
    let timeout = Duration::from_secs(options.timeout);
    let resolver = Resolver::with_sources(AwsSources::new().with_timeout(timeout))
        .with_default_region(&options.default_region)
        .with_cache(Arc::new(SessionCache::new()));
    let config = ClientConfig::default().with_timeout(timeout).with_kms_key_alias(&options.kms_key);

    // Bad input must fail before anything touches the network.
    let records = match &options.cmd {
        Command::Upload { csv, .. } => Some(tabular::parse_path(csv).map_err(ssm_manager::Error::from)?),
        _ => None,
    };

    let mut client = ParameterClient::connect(&resolver, auth.clone(), SSMConnector { timeout }, config)?;
    client.verify()?;
    info!("Connected using {} in region {}", auth.summary(), client.session().region());

    match options.cmd {
        Command::Upload { overwrite, skip_existing, .. } => {
            let records = records.unwrap_or_default();
            let result = if overwrite {
                sync(&mut client, records, &mut AlwaysOverwrite)
            } else if skip_existing {
                sync(&mut client, records, &mut AlwaysSkip)
            } else {
                sync(&mut client, records, &mut Interactive::new(ask_overwrite))
            };
            upload_result(result)
        }
        Command::List { no_decrypt, filter, output } => {
            let mut params = Vec::new();
            for param in client.list_all(!no_decrypt) {
                let param = param?;
                if filter.as_ref().map_or(true, |f| key_matches(&param.key, f)) {
                    params.push(param);
                }
            }
            match output {
                Some(path) => {
                    let rows = tabular::export_path(&params, &path).map_err(ssm_manager::Error::from)?;
                    info!("Exported {} parameters to {}", rows, path.display());
                }
                None => {
                    for param in &params {
                        println!("{}", serde_json::to_string(param)?);
                    }
                }
            }
            Ok(())
        }
        Command::Get { key, no_decrypt } => {
            let param = client.describe(&key, !no_decrypt)?;
            println!("{}", serde_json::to_string(&param)?);
            Ok(())
        }
        Command::Delete { key, force } => {
            if !force && !confirm(&format!("Delete parameter {}? [y/N]: ", key))? {
                info!("Not deleting {}", key);
                return Ok(());
            }
            client.delete(&key)?;
            info!("Deleted {}", key);
            Ok(())
        }
        Command::ListProfiles => Ok(()),
    }
}

fn upload_result(result: ssm_manager::Result<SyncReport>) -> Result<(), Error> {
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(partial) = err.partial_report() {
                print_report(partial);
            }
            return Err(err.into());
        }
    };
    print_report(&report);
    info!("Upload finished: {}", report);
    let failed = report.count(SyncAction::Failed);
    if failed > 0 {
        return Err(err_msg(format!("{} of {} parameters failed", failed, report.len())));
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(err) => println!("{:<8} {} ({}: {})", outcome.action, outcome.key, err.kind(), err),
            None => println!("{:<8} {}", outcome.action, outcome.key),
        }
    }
}

fn read_answer(prompt: &str) -> io::Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;
    let mut line = String::new();
    match io::stdin().read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    Ok(read_answer(prompt)?.map_or(false, |a| parse_answer(&a) == Some(ConflictDecision::Overwrite)))
}

fn ask_overwrite(key: &str, existing: &RemoteParameter, incoming: &ParameterRecord) -> ConflictDecision {
    let shown = |kind: ParameterType, value: &str| match kind {
        ParameterType::SecureString => "********".to_string(),
        _ => value.to_string(),
    };
    let prompt = format!(
        "{} exists (v{}: {} -> {}). Overwrite? [y]es/[n]o/[q]uit: ",
        key,
        existing.version,
        shown(existing.kind, &existing.tabular_value()),
        shown(incoming.kind, &incoming.value)
    );
    loop {
        match read_answer(&prompt) {
            Ok(Some(answer)) => match parse_answer(&answer) {
                Some(decision) => return decision,
                None => eprintln!("Please answer y, n or q."),
            },
            Ok(None) => {
                warn!("stdin closed, aborting upload");
                return ConflictDecision::Abort;
            }
            Err(err) => {
                warn!("cannot read answer: {}", err);
                return ConflictDecision::Abort;
            }
        }
    }
}
