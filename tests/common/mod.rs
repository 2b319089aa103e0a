// Copyright (c) 2025 NaturalIO

use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use aio_engine::harness::MioReactor;
use tempfile::TempDir;

pub fn setup_log() {
    use captains_log::recipe::stderr_logger;
    let log_config = stderr_logger(log::Level::Debug).test();
    let _ = log_config.build();
}

pub struct TempDevFile {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn make_temp_file() -> TempDevFile {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("aio-engine-test.dat");
    TempDevFile { _dir: dir, path }
}

pub fn create_temp_file(file: &TempDevFile) -> OwnedFd {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&file.path)
        .expect("openfile")
        .into()
}

/// Open (or re-open) the fixture with `O_DIRECT`, for tests exercising the
/// kernel's own alignment requirements.
pub fn open_direct(file: &TempDevFile, write: bool) -> OwnedFd {
    OpenOptions::new()
        .read(true)
        .write(write)
        .create(write)
        .custom_flags(libc::O_DIRECT)
        .open(&file.path)
        .expect("openfile O_DIRECT")
        .into()
}

pub fn new_reactor() -> MioReactor {
    MioReactor::new().expect("mio reactor")
}
