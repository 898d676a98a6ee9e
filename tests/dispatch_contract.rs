use sshclip_shell::core::config::{OverflowPolicy, ShellConfig};
use sshclip_shell::core::dispatch::{Invocation, Stage, dispatch};
use sshclip_shell::core::error::{CommandError, InvocationError, ShellError};
use sshclip_shell::core::request::Action;
use sshclip_shell::core::store::StoreName;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const USER_UID: u32 = 1000;

fn setup() -> (TempDir, ShellConfig) {
    let tmp = tempdir().expect("tempdir");
    let config = ShellConfig {
        store_root: tmp.path().join(".sshclip_store"),
        jitter_min_secs: 0,
        jitter_max_secs: 0,
        read_timeout_ms: 50,
        ..ShellConfig::default()
    };
    (tmp, config)
}

fn remote(restrictions: &str, command: &str) -> Invocation {
    Invocation {
        args: vec!["-c".into(), restrictions.into()],
        original_command: Some(command.to_string()),
        uid: USER_UID,
    }
}

fn run(config: &ShellConfig, invocation: &Invocation, stdin: &[u8]) -> (Result<PathBuf, (Stage, ShellError)>, Vec<u8>) {
    let mut input = stdin;
    let mut output = Vec::new();
    let outcome = dispatch(config, invocation, &mut input, &mut output)
        .map(|c| c.store_path)
        .map_err(|a| (a.stage, a.error));
    (outcome, output)
}

fn store_file(root: &Path, user: Option<&str>, store: &str) -> PathBuf {
    match user {
        Some(user) => root.join(user).join(store),
        None => root.join(store),
    }
}

#[test]
fn scenario_walkthrough_for_one_identity() {
    let (_tmp, config) = setup();
    let root = config.store_root.clone();
    let clipboard = store_file(&root, Some("alice"), "clipboard");

    // 1. get before any put: success, no output.
    let (outcome, out) = run(&config, &remote("user alice", "get clipboard"), b"");
    assert_eq!(outcome.unwrap(), clipboard);
    assert!(out.is_empty());

    // 2. put stores the exact bytes.
    let (outcome, _) = run(&config, &remote("user alice", "put clipboard"), b"aGVsbG8=");
    outcome.unwrap();
    assert_eq!(fs::read(&clipboard).unwrap(), b"aGVsbG8=");

    // 3. get returns them.
    let (outcome, out) = run(&config, &remote("user alice", "get clipboard"), b"");
    outcome.unwrap();
    assert_eq!(out, b"aGVsbG8=");

    // 4. unknown store: refused during validation.
    let (outcome, _) = run(&config, &remote("user alice", "put notastore"), b"aGVsbG8=");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ValidateRequest);
    assert!(matches!(error, ShellError::Command(CommandError::UnknownStore(ref s)) if s == "notastore"));
    assert_eq!(error.exit_code(), 2);
    assert!(!root.join("alice").join("notastore").exists());

    // 5. readonly put: refused, file unchanged.
    let (outcome, _) = run(&config, &remote("user alice readonly", "put clipboard"), b"b3RoZXI=");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::EnforcePolicy);
    assert!(matches!(error, ShellError::Command(CommandError::ReadOnly)));
    assert_eq!(fs::read(&clipboard).unwrap(), b"aGVsbG8=");

    // 6. invalid trailing bytes: refused.
    let (outcome, _) = run(&config, &remote("user alice", "put clipboard"), b"aGVsbG8=!!!");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::PerformIo);
    assert!(matches!(
        error,
        ShellError::Command(CommandError::InvalidEncoding { offset: 8, byte: b'!' })
    ));
}

#[test]
fn unknown_store_never_touches_the_filesystem() {
    let (_tmp, config) = setup();
    for store in ["notastore", "../../etc/passwd", "/tmp/x", "Clipboard", "clipboard/../primary"] {
        let (outcome, _) = run(&config, &remote("user alice", &format!("get {}", store)), b"");
        let (stage, _) = outcome.unwrap_err();
        assert_eq!(stage, Stage::ValidateRequest, "store {:?}", store);
    }
    assert!(!config.store_root.exists());
}

#[test]
fn readonly_get_is_allowed() {
    let (_tmp, config) = setup();
    let (outcome, _) = run(&config, &remote("user bob", "put primary"), b"cHJpbWFyeQ==");
    outcome.unwrap();
    let (outcome, out) = run(&config, &remote("readonly user bob", "get primary"), b"");
    outcome.unwrap();
    assert_eq!(out, b"cHJpbWFyeQ==");
}

#[test]
fn readonly_put_does_not_create_the_store() {
    let (_tmp, config) = setup();
    let (outcome, _) = run(&config, &remote("user carol readonly", "put secondary"), b"eA==");
    assert!(outcome.is_err());
    assert!(!config.store_root.exists());
}

#[test]
fn identities_are_isolated() {
    let (_tmp, config) = setup();
    run(&config, &remote("user alice", "put clipboard"), b"YWxpY2U=").0.unwrap();
    run(&config, &remote("user bob", "put clipboard"), b"Ym9i").0.unwrap();

    let (_, alice) = run(&config, &remote("user alice", "get clipboard"), b"");
    let (_, bob) = run(&config, &remote("user bob", "get clipboard"), b"");
    let (_, shared) = run(&config, &remote("", "get clipboard"), b"");
    assert_eq!(alice, b"YWxpY2U=");
    assert_eq!(bob, b"Ym9i");
    assert!(shared.is_empty());
}

#[test]
fn adversarial_identities_stay_under_root() {
    let (_tmp, config) = setup();
    for raw in ["../../escape", "/etc", "a b", "..", "x/../../y", "-rf"] {
        let (outcome, _) = run(&config, &remote(&format!("user {}", raw), "put clipboard"), b"eA==");
        match outcome {
            Ok(path) => {
                assert!(path.starts_with(&config.store_root), "{:?} escaped: {:?}", raw, path);
                let user_dir = path.parent().unwrap().file_name().unwrap().to_string_lossy().into_owned();
                assert!(user_dir.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            }
            Err((stage, error)) => {
                assert_eq!(stage, Stage::ResolvePath, "{:?}", raw);
                assert!(matches!(error, ShellError::Command(CommandError::EmptyIdentity)));
            }
        }
    }
    let parent = config.store_root.parent().unwrap();
    let entries: Vec<_> = fs::read_dir(parent).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(entries, vec![std::ffi::OsString::from(".sshclip_store")]);
}

#[test]
fn over_limit_transfers_succeed_truncated() {
    let (_tmp, config) = setup();
    let config = ShellConfig {
        max_transfer_bytes: 100,
        chunk_size: 16,
        ..config
    };
    let data = vec![b'Z'; 250];
    let mut input = data.as_slice();
    let mut sink = Vec::new();
    let completion = dispatch(&config, &remote("user dave", "put clipboard"), &mut input, &mut sink).unwrap();
    assert!(completion.transfer.truncated);
    assert_eq!(completion.transfer.bytes_written, 100);
    assert_eq!(fs::read(&completion.store_path).unwrap().len(), 100);

    fs::write(&completion.store_path, vec![b'Y'; 250]).unwrap();
    let mut empty: &[u8] = b"";
    let mut out = Vec::new();
    let completion = dispatch(&config, &remote("user dave", "get clipboard"), &mut empty, &mut out).unwrap();
    assert_eq!(completion.request.action, Action::Get);
    assert_eq!(completion.request.store, StoreName::Clipboard);
    assert!(completion.transfer.truncated);
    assert_eq!(out.len(), 100);
}

#[test]
fn transfers_of_exactly_the_limit_are_not_truncated() {
    let (_tmp, config) = setup();
    let config = ShellConfig {
        max_transfer_bytes: 64,
        chunk_size: 16,
        ..config
    };
    let data = vec![b'W'; 64];
    let mut input = data.as_slice();
    let mut sink = Vec::new();
    let put = dispatch(&config, &remote("user erin", "put primary"), &mut input, &mut sink).unwrap();
    assert!(!put.transfer.truncated);
    assert_eq!(put.transfer.bytes_written, 64);

    let mut empty: &[u8] = b"";
    let mut out = Vec::new();
    let get = dispatch(&config, &remote("user erin", "get primary"), &mut empty, &mut out).unwrap();
    assert!(!get.transfer.truncated);
    assert_eq!(out, data);
}

#[test]
fn over_budget_request_is_refused() {
    let (_tmp, config) = setup();
    let long = format!("get {}", "c".repeat(80));
    let (outcome, _) = run(&config, &remote("user alice", &long), b"");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ObtainRequest);
    assert!(matches!(
        error,
        ShellError::Command(CommandError::RequestTooLong { len: 83, max: 60 })
    ));
}

#[test]
fn over_budget_restrictions_only_log() {
    let (_tmp, config) = setup();
    let restrictions = format!("user alice {}", "padding".repeat(20));
    let (outcome, _) = run(&config, &remote(&restrictions, "get clipboard"), b"");
    outcome.unwrap();
}

#[test]
fn token_overflow_follows_policy() {
    let (_tmp, config) = setup();
    let command = "get clipboard a b c d e";

    // Truncated to five tokens, which is still the wrong arity.
    let (outcome, _) = run(&config, &remote("", command), b"");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ValidateRequest);
    assert!(matches!(error, ShellError::Command(CommandError::WrongArity(5))));

    let strict = ShellConfig {
        overflow_policy: OverflowPolicy::Reject,
        ..config
    };
    let (outcome, _) = run(&strict, &remote("", command), b"");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ObtainRequest);
    assert!(matches!(error, ShellError::Command(CommandError::TooManyTokens { max: 5 })));
}

#[test]
fn truncation_can_turn_an_overlong_request_into_a_valid_one() {
    let (_tmp, config) = setup();
    let config = ShellConfig {
        max_tokens: 2,
        ..config
    };
    let (outcome, _) = run(&config, &remote("", "get clipboard ignored"), b"");
    outcome.unwrap();

    let strict = ShellConfig {
        overflow_policy: OverflowPolicy::Reject,
        ..config
    };
    assert!(run(&strict, &remote("", "get clipboard ignored"), b"").0.is_err());
}

#[test]
fn local_invocation_uses_arguments_as_request_without_restrictions() {
    let (_tmp, config) = setup();
    let local = Invocation {
        args: vec!["-c".into(), "put secondary".into()],
        original_command: None,
        uid: USER_UID,
    };
    let (outcome, _) = run(&config, &local, b"bG9jYWw=\n");
    assert_eq!(outcome.unwrap(), config.store_root.join("secondary"));
    assert_eq!(fs::read(config.store_root.join("secondary")).unwrap(), b"bG9jYWw=\n");
}

#[test]
fn local_invocation_ignores_readonly_keyword() {
    let (_tmp, config) = setup();
    let local = Invocation {
        args: vec!["-c".into(), "readonly".into()],
        original_command: None,
        uid: USER_UID,
    };
    let (outcome, _) = run(&config, &local, b"");
    let (_, error) = outcome.unwrap_err();
    assert!(matches!(error, ShellError::Command(CommandError::WrongArity(1))));
}

#[test]
fn invocation_errors_exit_126() {
    let (_tmp, config) = setup();
    let as_root = Invocation {
        uid: 0,
        ..remote("user alice", "get clipboard")
    };
    let (outcome, _) = run(&config, &as_root, b"");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ParseInvocation);
    assert!(matches!(error, ShellError::Invocation(InvocationError::Privileged)));
    assert_eq!(error.exit_code(), 126);

    let no_flag = Invocation {
        args: vec!["user".into(), "alice".into()],
        ..remote("", "get clipboard")
    };
    let (outcome, _) = run(&config, &no_flag, b"");
    let (_, error) = outcome.unwrap_err();
    assert!(matches!(error, ShellError::Invocation(InvocationError::MissingCommandFlag)));
    assert_eq!(error.exit_code(), 126);
    assert!(!config.store_root.exists());
}

#[test]
fn store_root_occupied_by_file_fails_resolution() {
    let (_tmp, config) = setup();
    fs::write(&config.store_root, b"not a dir").unwrap();
    let (outcome, _) = run(&config, &remote("user alice", "get clipboard"), b"");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ResolvePath);
    assert!(matches!(error, ShellError::Command(CommandError::NotADirectory(_))));
}

#[test]
fn symlinked_store_root_is_followed() {
    let (tmp, config) = setup();
    let real = tmp.path().join("elsewhere");
    fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, &config.store_root).unwrap();

    let (outcome, _) = run(&config, &remote("user alice", "put clipboard"), b"eHl6");
    assert_eq!(outcome.unwrap(), real.join("alice").join("clipboard"));
    assert_eq!(fs::read(real.join("alice").join("clipboard")).unwrap(), b"eHl6");
}

#[test]
fn overlong_store_path_is_refused_before_opening() {
    let (_tmp, config) = setup();
    let config = ShellConfig {
        max_path_len: 10,
        ..config
    };
    let (outcome, _) = run(&config, &remote("user alice", "put clipboard"), b"eA==");
    let (stage, error) = outcome.unwrap_err();
    assert_eq!(stage, Stage::ResolvePath);
    assert!(matches!(error, ShellError::Command(CommandError::PathTooLong { .. })));
    assert!(!config.store_root.join("alice").join("clipboard").exists());
}

#[test]
fn last_writer_wins() {
    let (_tmp, config) = setup();
    run(&config, &remote("user erin", "put clipboard"), b"Zmlyc3QgdmFsdWU=").0.unwrap();
    run(&config, &remote("user erin", "put clipboard"), b"c2Vjb25k").0.unwrap();
    let (_, out) = run(&config, &remote("user erin", "get clipboard"), b"");
    assert_eq!(out, b"c2Vjb25k");
}
