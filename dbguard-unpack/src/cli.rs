use std::path::PathBuf;

use clap::Parser;

/// Offline extractor: reads an archive already sitting on local disk
/// (downloaded from a storage location beforehand, if it came from
/// one) and writes every entry into `dest`.
#[derive(Parser, Debug)]
#[command(name = "dbguard-unpack", about = "Extract a dbguard archive to a directory")]
pub struct Cli {
    /// Path to the archive file, encrypted or not.
    #[arg(long)]
    pub source: PathBuf,

    /// Directory entries are extracted into; created if missing.
    #[arg(long)]
    pub dest: PathBuf,

    /// Passphrase literal, for an encrypted archive.
    #[arg(long, group = "passphrase_source")]
    pub passphrase: Option<String>,

    /// Read the passphrase from a file, trimming one trailing newline.
    #[arg(long, group = "passphrase_source")]
    pub passphrase_file: Option<PathBuf>,

    /// Read the passphrase from an environment variable.
    #[arg(long, group = "passphrase_source")]
    pub passphrase_env: Option<String>,
}
