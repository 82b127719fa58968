//! Straight-line extraction: open the archive (through the crypto
//! layer if a passphrase was given), then copy every entry out to
//! `dest` verbatim. No retry, no partial-extraction resume — a failed
//! entry aborts the whole run.

use std::{fs::File, path::Path};

use anyhow::{bail, Context, Result};
use dbguard_core::{
    archive::ArchiveReader,
    config::SecretRef,
    crypto::CryptoReaderAt,
};
use positioned_io::ReadAt;
use secrecy::Secret;
use tracing::info;

use crate::cli::Cli;

fn passphrase_ref(cli: &Cli) -> Option<SecretRef> {
    if let Some(literal) = &cli.passphrase {
        return Some(SecretRef::Literal(literal.clone()));
    }
    if let Some(file) = &cli.passphrase_file {
        return Some(SecretRef::File { file: file.clone() });
    }
    if let Some(env) = &cli.passphrase_env {
        return Some(SecretRef::Env { env: env.clone() });
    }
    None
}

pub fn run(cli: &Cli) -> Result<()> {
    let passphrase: Option<Secret<String>> = passphrase_ref(cli).map(|r| r.resolve()).transpose()?;

    let file = File::open(&cli.source).with_context(|| format!("opening {}", cli.source.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("reading metadata for {}", cli.source.display()))?
        .len();

    std::fs::create_dir_all(&cli.dest).with_context(|| format!("creating {}", cli.dest.display()))?;

    match passphrase {
        Some(pass) => {
            let reader = CryptoReaderAt::open(file, file_len, &pass)?;
            let plaintext_len = reader.len();
            extract_all(reader, plaintext_len, &cli.dest)
        }
        None => extract_all(file, file_len, &cli.dest),
    }
}

fn extract_all<R: ReadAt>(source: R, size: u64, dest: &Path) -> Result<()> {
    let archive = ArchiveReader::open(source, size)?;

    let mut names: Vec<String> = archive.entries().map(str::to_string).collect();
    names.sort();

    for name in names {
        extract_entry(&archive, &name, dest)?;
    }

    Ok(())
}

fn extract_entry<R: ReadAt>(archive: &ArchiveReader<R>, name: &str, dest: &Path) -> Result<()> {
    if name.split('/').any(|part| part == "..") {
        bail!("refusing to extract entry with a parent-directory component: {name:?}");
    }

    let size = archive.entry_size(name)?;
    let slice = archive.entry(name)?;

    let target = dest.join(name);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut buf = vec![0u8; size as usize];
    slice.read_exact_at(0, &mut buf)?;
    std::fs::write(&target, &buf).with_context(|| format!("writing {}", target.display()))?;

    info!(entry = name, bytes = size, "extracted entry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbguard_core::{archive::ArchiveWriter, crypto::CryptoWriter};
    use std::io::Write as _;

    fn write_plain_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ArchiveWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer.create(name).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn extracts_every_entry_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("archive.bin");
        write_plain_archive(&archive_path, &[("a.sst", b"hello"), ("nested/b.sst", b"world")]);

        let dest = tmp.path().join("out");
        let file = File::open(&archive_path).unwrap();
        let size = file.metadata().unwrap().len();
        extract_all(file, size, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("a.sst")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest.join("nested/b.sst")).unwrap(), b"world");
    }

    #[test]
    fn rejects_parent_directory_traversal_in_entry_name() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("archive.bin");
        write_plain_archive(&archive_path, &[("../escape.sst", b"bad")]);

        let dest = tmp.path().join("out");
        let file = File::open(&archive_path).unwrap();
        let size = file.metadata().unwrap().len();
        assert!(extract_all(file, size, &dest).is_err());
    }

    #[test]
    fn extracts_encrypted_archive_given_matching_passphrase() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("archive.bin.enc");
        let pass = Secret::new("correct horse".to_string());

        let mut writer = CryptoWriter::create(File::create(&archive_path).unwrap(), &pass).unwrap();
        {
            let mut archive = ArchiveWriter::new(&mut writer);
            archive.create("a.sst").unwrap();
            archive.write_all(b"secret-bytes").unwrap();
            archive.close().unwrap();
        }
        writer.finish();

        let dest = tmp.path().join("out");
        let file = File::open(&archive_path).unwrap();
        let size = file.metadata().unwrap().len();
        let reader = CryptoReaderAt::open(file, size, &pass).unwrap();
        let plaintext_len = reader.len();
        extract_all(reader, plaintext_len, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("a.sst")).unwrap(), b"secret-bytes");
    }
}
