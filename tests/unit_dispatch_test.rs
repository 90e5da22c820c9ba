// tests/unit_dispatch_test.rs
//
// End-to-end exercises of the dispatcher over an in-memory connector,
// covering the unprivileged ("switch_uid = false") scenarios from the
// spec's worked examples without requiring root.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor};
use std::sync::Arc;

use tsi::config::Config;
use tsi::core::connector::Connector;
use tsi::core::context::TsiContext;
use tsi::core::handler::builtin;
use tsi::core::handler::dispatch::Dispatcher;
use tsi::core::handler::registry::HandlerRegistry;
use tsi::core::identity::IdentitySwitch;

fn unprivileged_config() -> Config {
    Config {
        switch_uid: false,
        enforce_os_gids: true,
        fail_on_invalid_gids: false,
        use_id_to_resolve_gids: false,
        open_user_sessions: false,
        use_syslog: false,
        debug: false,
        user_cache_ttl_secs: 60,
        worker_id: "1".into(),
        safe_dir: "/tmp".into(),
        default_job_name: "UnicoreJob".into(),
        njs_machine: String::new(),
        nodes_filter: String::new(),
        listen_host: "127.0.0.1".into(),
        listen_port: 4433,
        getfacl_cmd: None,
        setfacl_cmd: None,
        nfs_getfacl_cmd: None,
        nfs_setfacl_cmd: None,
        acl_policies: HashMap::new(),
        allowed_dns: Vec::new(),
        allowed_ips: Vec::new(),
        extra: HashMap::new(),
    }
}

fn dispatcher_for(config: Config) -> Dispatcher {
    let config = Arc::new(config);
    let registry = HandlerRegistry::builder()
        .register("TSI_PING_UID", Box::new(builtin::ping_uid))
        .register("TSI_EXECUTESCRIPT", Box::new(builtin::execute_script))
        .build();
    let identity = IdentitySwitch::initialize(&config).expect("initialize should not fail for switch_uid=false");
    let context = TsiContext {
        config: config.clone(),
        effective_uid: identity.effective_uid(),
    };
    Dispatcher {
        registry,
        identity,
        config,
        context,
    }
}

/// A `Connector` over a single fixed input message and a recorded list
/// of written lines, so assertions can inspect exactly what the
/// dispatcher sent without round-tripping through a real socket.
struct RecordingConnector {
    reader: Cursor<Vec<u8>>,
    read_done: bool,
    written: Vec<String>,
}

impl RecordingConnector {
    fn new(input: &str) -> Self {
        Self {
            reader: Cursor::new(input.as_bytes().to_vec()),
            read_done: false,
            written: Vec::new(),
        }
    }
}

impl Connector for RecordingConnector {
    fn read_message(&mut self) -> std::io::Result<String> {
        if self.read_done {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no more messages"));
        }
        self.read_done = true;
        let mut message = String::new();
        let mut reader = BufReader::new(&mut self.reader);
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 || line == "\n" || line == "\r\n" {
                break;
            }
            message.push_str(&line);
        }
        Ok(message)
    }

    fn write_message(&mut self, msg: &str) -> std::io::Result<()> {
        self.written.push(msg.to_string());
        Ok(())
    }
}

#[test]
fn ping_bypasses_identity_even_when_switch_uid_true() {
    // TSI_PING is answered before any identity handling, so it must
    // succeed unconditionally.
    let mut dispatcher = dispatcher_for(unprivileged_config());
    let mut connector = RecordingConnector::new("#TSI_PING\n\n");
    dispatcher.run(&mut connector);
    assert!(connector.written.iter().any(|l| l == builtin::VERSION));
    assert_eq!(connector.written.last(), Some(&"ENDOFMESSAGE".to_string()));
}

#[test]
fn unknown_command_reports_failure_and_terminator() {
    let mut dispatcher = dispatcher_for(unprivileged_config());
    let mut connector = RecordingConnector::new("#TSI_NOPE\n\n");
    dispatcher.run(&mut connector);
    assert!(connector.written[0].starts_with("TSI_FAILED"));
    assert_eq!(connector.written.last(), Some(&"ENDOFMESSAGE".to_string()));
}

#[test]
fn message_with_no_tag_reports_failure() {
    let mut dispatcher = dispatcher_for(unprivileged_config());
    let mut connector = RecordingConnector::new("just some text with no command marker\n\n");
    dispatcher.run(&mut connector);
    assert!(connector.written[0].starts_with("TSI_FAILED"));
}

#[test]
fn unprivileged_ping_uid_reports_worker_identity_without_switching() {
    let mut dispatcher = dispatcher_for(unprivileged_config());
    let mut connector = RecordingConnector::new("#TSI_PING_UID\n#TSI_IDENTITY alice users\n\n");
    dispatcher.run(&mut connector);
    assert!(connector.written.iter().any(|l| l.starts_with("running as UID")));
    assert_eq!(connector.written.last(), Some(&"ENDOFMESSAGE".to_string()));
}

#[test]
fn execute_script_runs_inline_when_sessions_not_forked() {
    let mut dispatcher = dispatcher_for(unprivileged_config());
    let mut connector =
        RecordingConnector::new("#TSI_EXECUTESCRIPT\n#TSI_IDENTITY alice users\necho scenario-output\n\n");
    dispatcher.run(&mut connector);
    assert_eq!(connector.written[0], "TSI_OK");
    assert!(connector.written[1].contains("scenario-output"));
}
