// src/main.rs
//
// Entry point: parse the `--config` flag, initialize logging, load and
// validate configuration, bind the listener, and serve. Runs
// synchronously end to end; no async runtime is involved anywhere in
// this process.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tsi::config::Config;
use tsi::core::handler::builtin;
use tsi::core::handler::collaborators::Collaborators;
use tsi::core::handler::registry::HandlerRegistry;
use tsi::server::TsiServer;

const DEFAULT_CONFIG_PATH: &str = "/etc/tsi.conf";

fn parse_config_path(args: &[String]) -> String {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            if let Some(path) = iter.next() {
                return path.clone();
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_registry(collaborators: &Collaborators) -> HandlerRegistry {
    let bss = collaborators.batch_system.clone();
    let bss2 = collaborators.batch_system.clone();
    let bss3 = collaborators.batch_system.clone();
    let bss4 = collaborators.batch_system.clone();
    let bss5 = collaborators.batch_system.clone();
    let bss6 = collaborators.batch_system.clone();
    let bss7 = collaborators.batch_system.clone();
    let bss8 = collaborators.batch_system.clone();
    let io1 = collaborators.file_io.clone();
    let io2 = collaborators.file_io.clone();
    let io3 = collaborators.file_io.clone();
    let io4 = collaborators.file_io.clone();
    let acl = collaborators.acl.clone();
    let uftp = collaborators.uftp.clone();
    let res1 = collaborators.reservation.clone();
    let res2 = collaborators.reservation.clone();
    let res3 = collaborators.reservation.clone();

    HandlerRegistry::builder()
        .register("TSI_PING", Box::new(builtin::ping))
        .register("TSI_PING_UID", Box::new(builtin::ping_uid))
        .register("TSI_EXECUTESCRIPT", Box::new(builtin::execute_script))
        .register("TSI_SUBMIT", Box::new(move |m, c, ctx| bss.submit(m, c, ctx)))
        .register("TSI_GETSTATUSLISTING", Box::new(move |m, c, ctx| bss2.get_status_listing(m, c, ctx)))
        .register("TSI_GETPROCESSLISTING", Box::new(move |m, c, ctx| bss3.get_process_listing(m, c, ctx)))
        .register("TSI_GETJOBDETAILS", Box::new(move |m, c, ctx| bss4.get_job_details(m, c, ctx)))
        .register("TSI_ABORTJOB", Box::new(move |m, c, ctx| bss5.abort_job(m, c, ctx)))
        .register("TSI_HOLDJOB", Box::new(move |m, c, ctx| bss6.hold_job(m, c, ctx)))
        .register("TSI_RESUMEJOB", Box::new(move |m, c, ctx| bss7.resume_job(m, c, ctx)))
        .register("TSI_GET_COMPUTE_BUDGET", Box::new(move |m, c, ctx| bss8.get_budget(m, c, ctx)))
        .register("TSI_GETFILECHUNK", Box::new(move |m, c, ctx| io1.get_file_chunk(m, c, ctx)))
        .register("TSI_PUTFILECHUNK", Box::new(move |m, c, ctx| io2.put_file_chunk(m, c, ctx)))
        .register("TSI_LS", Box::new(move |m, c, ctx| io3.ls(m, c, ctx)))
        .register("TSI_DF", Box::new(move |m, c, ctx| io4.df(m, c, ctx)))
        .register("TSI_FILE_ACL", Box::new(move |m, c, ctx| acl.process_acl(m, c, ctx)))
        .register("TSI_UFTP", Box::new(move |m, c, ctx| uftp.uftp(m, c, ctx)))
        .register("TSI_MAKE_RESERVATION", Box::new(move |m, c, ctx| res1.make_reservation(m, c, ctx)))
        .register("TSI_QUERY_RESERVATION", Box::new(move |m, c, ctx| res2.query_reservation(m, c, ctx)))
        .register("TSI_CANCEL_RESERVATION", Box::new(move |m, c, ctx| res3.cancel_reservation(m, c, ctx)))
        .build()
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args[1..]);

    let config = Config::from_file(&config_path).map_err(|e| format!("startup failed: {e}"))?;
    init_logging(config.debug);

    tracing::info!(version = builtin::VERSION, config = %config_path, "starting TSI");

    let config = Arc::new(config);
    let server = TsiServer::bind(config).map_err(|e| format!("failed to bind listener: {e}"))?;

    server
        .run(|| build_registry(&Collaborators::default()))
        .map_err(|e| format!("server loop exited: {e}"))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_path_flag() {
        let args = vec!["tsi".to_string(), "--config".to_string(), "/tmp/tsi.conf".to_string()];
        assert_eq!(parse_config_path(&args[1..]), "/tmp/tsi.conf");
    }

    #[test]
    fn parses_config_path_equals_form() {
        let args = vec!["tsi".to_string(), "--config=/tmp/tsi.conf".to_string()];
        assert_eq!(parse_config_path(&args[1..]), "/tmp/tsi.conf");
    }

    #[test]
    fn falls_back_to_default_config_path() {
        let args = vec!["tsi".to_string()];
        assert_eq!(parse_config_path(&args[1..]), DEFAULT_CONFIG_PATH);
    }
}
