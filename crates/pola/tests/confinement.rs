//! End-to-end confinement tests against the real filesystem.
//!
//! These run the whole chain a confined process goes through: a command line
//! is parsed, its context is exported into a child environment, loaded back,
//! and every open is decided by a policed gateway over the genuine libc
//! primitives.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use pola::{
    AccessMode, AuthorizationContext, FilesystemGateway, Invocation, MatchMode, PermissionStore,
    PolicedGateway, PolicySettings, RealGateway, TerminalPrompter,
};

type ChildGateway = PolicedGateway<
    RealGateway,
    TerminalPrompter<Cursor<Vec<u8>>, Vec<u8>>,
    (),
    HashMap<String, OsString>,
>;

/// Build the gateway a confined child would build for `line`.
fn child_of(line: &str, answers: &str) -> ChildGateway {
    let invocation = Invocation::parse(line, PolicySettings::default());
    let mut env: HashMap<String, OsString> = HashMap::new();
    invocation.context().export(&mut env);
    child_from_env(env, answers)
}

fn child_from_env(env: HashMap<String, OsString>, answers: &str) -> ChildGateway {
    let settings = PolicySettings::from_env(&env).unwrap();
    let context = AuthorizationContext::load(&env, settings);
    PolicedGateway::new(
        RealGateway::direct(),
        PermissionStore::new(context),
        TerminalPrompter::new(Cursor::new(answers.as_bytes().to_vec()), Vec::new()),
        (),
        env,
    )
}

fn c(path: &Path) -> CString {
    CString::new(path.to_str().unwrap()).unwrap()
}

fn read_all(gw: &mut ChildGateway, path: &Path) -> io::Result<String> {
    let fd = gw.open(&c(path), libc::O_RDONLY, 0)?;
    let mut contents = String::new();
    File::from(fd).read_to_string(&mut contents)?;
    Ok(contents)
}

#[test]
fn test_named_file_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "hello").unwrap();

    let mut gw = child_of(&format!("cat {}", notes.display()), "");
    assert_eq!(read_all(&mut gw, &notes).unwrap(), "hello");
}

#[test]
fn test_unnamed_file_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, "hidden").unwrap();

    let mut gw = child_of("cat other.txt", "");
    let err = read_all(&mut gw, &secret).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
}

#[test]
fn test_missing_file_reports_os_error_after_authorization() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");

    let mut gw = child_of(&format!("cat {}", missing.display()), "");
    let err = read_all(&mut gw, &missing).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[test]
fn test_annotated_file_is_writable() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");

    let mut gw = child_of(&format!("tee +{}", out.display()), "");
    let fd = gw
        .open(&c(&out), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o600)
        .unwrap();
    File::from(fd).write_all(b"written").unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "written");
}

#[test]
fn test_write_without_annotation_leaves_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    std::fs::write(&out, "original").unwrap();

    let mut gw = child_of(&format!("tee {}", out.display()), "");
    let err = gw
        .open(&c(&out), libc::O_WRONLY | libc::O_TRUNC, 0)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));

    // A read-only open of a named file must not truncate either.
    gw.open(&c(&out), libc::O_RDONLY | libc::O_TRUNC, 0).unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "original");
}

#[test]
fn test_opendir_on_named_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("logs");
    std::fs::create_dir(&sub).unwrap();

    let mut gw = child_of(&format!("ls {}", sub.display()), "");
    let handle = gw.opendir(&c(&sub)).unwrap();
    assert!(!handle.as_ptr().is_null());
    drop(handle);

    let err = gw.opendir(&c(dir.path())).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
}

#[test]
fn test_grants_do_not_leak_between_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");

    let first = child_of(&format!("touch +{}", out.display()), "");
    assert!(first.store().context().write.contains(out.to_str().unwrap().as_bytes()));

    let mut second = child_of("ls", "");
    let err = second
        .open(&c(&out), libc::O_WRONLY | libc::O_CREAT, 0o600)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
}

#[test]
fn test_remembered_grant_reaches_grandchild() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.txt");
    std::fs::write(&data, "payload").unwrap();

    let invocation = Invocation::interactive(vec!["sh".to_string()], PolicySettings::default());
    let mut env: HashMap<String, OsString> = HashMap::new();
    invocation.context().export(&mut env);

    let mut child = child_from_env(env, "r\n");
    assert_eq!(read_all(&mut child, &data).unwrap(), "payload");

    // A process spawned after the grant inherits the updated environment and
    // reads without asking.
    let mut grandchild = child_from_env(child.env().clone(), "");
    assert_eq!(read_all(&mut grandchild, &data).unwrap(), "payload");
    assert!(grandchild.prompter().output().is_empty());
}

#[test]
fn test_exact_grant_with_plus_survives_export() {
    let settings = PolicySettings {
        match_mode: MatchMode::Exact,
        ..PolicySettings::default()
    };
    let invocation = Invocation::parse("g++ -o +a+b.out main.cc", settings);
    let parent = PermissionStore::new(invocation.context().clone());
    assert!(parent.is_authorized(b"a+b.out", AccessMode::Write));

    let mut env: HashMap<String, OsString> = HashMap::new();
    invocation.context().export(&mut env);
    let settings = PolicySettings::from_env(&env).unwrap();
    assert_eq!(settings.match_mode, MatchMode::Exact);

    let child = PermissionStore::new(AuthorizationContext::load(&env, settings));
    assert!(child.is_authorized(b"a+b.out", AccessMode::Write));
    assert!(!child.is_authorized(b"a", AccessMode::Write));
    assert!(!child.is_authorized(b"b.out", AccessMode::Write));
}

#[test]
fn test_exact_grant_with_plus_opens_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("a+b.out");

    let settings = PolicySettings {
        match_mode: MatchMode::Exact,
        ..PolicySettings::default()
    };
    let invocation = Invocation::parse(&format!("cc -o +{} main.c", out.display()), settings);
    let mut env: HashMap<String, OsString> = HashMap::new();
    invocation.context().export(&mut env);

    let mut gw = child_from_env(env, "");
    let fd = gw
        .open(&c(&out), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o600)
        .unwrap();
    File::from(fd).write_all(b"binary").unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "binary");
}
