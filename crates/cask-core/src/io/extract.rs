//! Container detection and extraction.
//!
//! Detection walks [`ContainerKind::AUTODETECT`] in order and the first probe
//! that claims the file wins. Formats that can carry a tar stream (xip, xar)
//! are probed before `tar`, and bare compressed streams come last so a richer
//! format is never mistaken for one. `naked` and `generic_unar` have no
//! reliable signature and are only used when declared.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use cask_schema::Token;
use flate2::read::GzDecoder;
use tracing::{debug, info};
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use crate::command::{CommandRunner, SystemCommand};
use crate::error::{CaskError, Result};
use crate::io::dmg;

const HEADER_LEN: usize = 512;

const MAGIC_XAR: &[u8] = b"xar!";
const MAGIC_TTF: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00];
const MAGIC_OTF: &[u8] = b"OTTO";
const MAGIC_CAB: &[u8] = b"MSCF";
const MAGIC_DMG_TRAILER: &[u8] = b"koly";
const MAGIC_7Z: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const MAGIC_RAR: &[u8] = b"Rar!";
const MAGIC_ZIP: &[u8] = b"PK\x03\x04";
const MAGIC_ZIP_EMPTY: &[u8] = b"PK\x05\x06";
const MAGIC_BZIP2: &[u8] = b"BZh";
const MAGIC_GZIP: &[u8] = &[0x1F, 0x8B];
const MAGIC_LZMA: &[u8] = &[0x5D, 0x00, 0x00, 0x80, 0x00];
const MAGIC_XZ: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
/// Magic bytes for ZSTD compression (Little Endian: 0xFD2FB528 -> 28 B5 2F FD)
const MAGIC_ZSTD: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
const USTAR_OFFSET: usize = 257;

/// Volume entries that are never copied out of a disk image.
const DMG_SKIP: &[&str] = &[
    ".DocumentRevisions-V100",
    ".fseventsd",
    ".Spotlight-V100",
    ".TemporaryItems",
    ".Trashes",
    ".VolumeIcon.icns",
];

const AIR_INSTALLER: &str =
    "/Applications/Utilities/Adobe AIR Application Installer.app/Contents/MacOS/Adobe AIR Application Installer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Pkg,
    Ttf,
    Otf,
    Air,
    Cab,
    Dmg,
    SevenZip,
    Sit,
    Rar,
    Zip,
    Xip,
    Xar,
    Tar,
    Bzip2,
    Gzip,
    Lzma,
    Xz,
    Naked,
    GenericUnar,
}

impl ContainerKind {
    /// Probe order for autodetection.
    pub const AUTODETECT: [Self; 17] = [
        Self::Pkg,
        Self::Ttf,
        Self::Otf,
        Self::Air,
        Self::Cab,
        Self::Dmg,
        Self::SevenZip,
        Self::Sit,
        Self::Rar,
        Self::Zip,
        Self::Xip,
        Self::Xar,
        Self::Tar,
        Self::Bzip2,
        Self::Gzip,
        Self::Lzma,
        Self::Xz,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pkg => "pkg",
            Self::Ttf => "ttf",
            Self::Otf => "otf",
            Self::Air => "air",
            Self::Cab => "cab",
            Self::Dmg => "dmg",
            Self::SevenZip => "seven_zip",
            Self::Sit => "sit",
            Self::Rar => "rar",
            Self::Zip => "zip",
            Self::Xip => "xip",
            Self::Xar => "xar",
            Self::Tar => "tar",
            Self::Bzip2 => "bzip2",
            Self::Gzip => "gzip",
            Self::Lzma => "lzma",
            Self::Xz => "xz",
            Self::Naked => "naked",
            Self::GenericUnar => "generic_unar",
        }
    }

    /// Look up an explicitly declared container type.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches(':').to_lowercase();
        match name.as_str() {
            "7z" | "sevenzip" => Some(Self::SevenZip),
            _ => Self::AUTODETECT
                .into_iter()
                .chain([Self::Naked, Self::GenericUnar])
                .find(|k| k.name() == name),
        }
    }

    fn probe(self, file: &Sniffed, runner: &dyn CommandRunner) -> bool {
        let head = file.head.as_slice();
        match self {
            Self::Pkg => {
                file.has_extension(&["pkg", "mpkg"]) && (file.is_dir || head.starts_with(MAGIC_XAR))
            }
            Self::Ttf => head.starts_with(MAGIC_TTF),
            Self::Otf => head.starts_with(MAGIC_OTF),
            Self::Air => file.has_extension(&["air"]),
            Self::Cab => head.starts_with(MAGIC_CAB),
            Self::Dmg => file.tail.starts_with(MAGIC_DMG_TRAILER),
            Self::SevenZip => head.starts_with(MAGIC_7Z),
            Self::Sit => head.starts_with(b"StuffIt") || head.starts_with(b"SIT!"),
            Self::Rar => head.starts_with(MAGIC_RAR),
            Self::Zip => head.starts_with(MAGIC_ZIP) || head.starts_with(MAGIC_ZIP_EMPTY),
            Self::Xip => head.starts_with(MAGIC_XAR) && is_xip(&file.path, runner),
            Self::Xar => head.starts_with(MAGIC_XAR),
            Self::Tar => is_tar(file, runner),
            Self::Bzip2 => head.starts_with(MAGIC_BZIP2),
            Self::Gzip => head.starts_with(MAGIC_GZIP),
            Self::Lzma => head.starts_with(MAGIC_LZMA),
            Self::Xz => head.starts_with(MAGIC_XZ),
            Self::Naked | Self::GenericUnar => false,
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The bytes detection looks at.
struct Sniffed {
    path: PathBuf,
    is_dir: bool,
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl Sniffed {
    fn read(path: &Path) -> io::Result<Self> {
        if path.is_dir() {
            return Ok(Self {
                path: path.to_path_buf(),
                is_dir: true,
                head: Vec::new(),
                tail: Vec::new(),
            });
        }

        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut head = Vec::with_capacity(HEADER_LEN);
        (&mut file).take(HEADER_LEN as u64).read_to_end(&mut head)?;

        let mut tail = Vec::with_capacity(HEADER_LEN);
        if len >= HEADER_LEN as u64 {
            file.seek(SeekFrom::End(-(HEADER_LEN as i64)))?;
            file.read_to_end(&mut tail)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            is_dir: false,
            head,
            tail,
        })
    }

    fn has_extension(&self, exts: &[&str]) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
    }
}

fn has_ustar(block: &[u8]) -> bool {
    block
        .get(USTAR_OFFSET..USTAR_OFFSET + 5)
        .is_some_and(|m| m == b"ustar")
}

fn decoded_head(reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    let _ = reader.take(HEADER_LEN as u64).read_to_end(&mut buf);
    buf
}

fn is_tar(file: &Sniffed, runner: &dyn CommandRunner) -> bool {
    let head = file.head.as_slice();
    if has_ustar(head) {
        return true;
    }
    if head.starts_with(MAGIC_GZIP) {
        return File::open(&file.path)
            .is_ok_and(|f| has_ustar(&decoded_head(GzDecoder::new(BufReader::new(f)))));
    }
    if head.starts_with(MAGIC_ZSTD) {
        return File::open(&file.path)
            .ok()
            .and_then(|f| ZstdDecoder::new(BufReader::new(f)).ok())
            .is_some_and(|d| has_ustar(&decoded_head(d)));
    }
    if head.starts_with(MAGIC_BZIP2) || head.starts_with(MAGIC_XZ) || head.starts_with(MAGIC_LZMA) {
        return runner
            .run(
                &SystemCommand::new("/usr/bin/tar")
                    .arg("-tf")
                    .arg(&file.path)
                    .allow_failure(),
            )
            .is_ok_and(|out| out.success);
    }
    false
}

fn is_xip(path: &Path, runner: &dyn CommandRunner) -> bool {
    runner
        .run(
            &SystemCommand::new("/usr/bin/xar")
                .arg("-t")
                .arg("-f")
                .arg(path)
                .allow_failure(),
        )
        .is_ok_and(|out| {
            let entries: Vec<&str> = out.stdout.lines().collect();
            out.success && entries.contains(&"Content") && entries.contains(&"Metadata")
        })
}

/// Resolve the container of a downloaded file.
///
/// An explicit type is a direct lookup; otherwise the probe chain decides.
///
/// # Errors
///
/// [`CaskError::UnknownContainerType`] for an unknown explicit name,
/// [`CaskError::UnknownContainerFormat`] when no probe claims the file.
pub fn detect(
    token: &Token,
    path: &Path,
    explicit: Option<&str>,
    runner: &dyn CommandRunner,
) -> Result<ContainerKind> {
    if let Some(name) = explicit {
        return ContainerKind::from_name(name).ok_or_else(|| CaskError::UnknownContainerType {
            token: token.clone(),
            kind: name.to_string(),
        });
    }

    let sniffed =
        Sniffed::read(path).map_err(CaskError::io(format!("reading {}", path.display())))?;

    let kind = ContainerKind::AUTODETECT
        .into_iter()
        .find(|k| k.probe(&sniffed, runner))
        .ok_or_else(|| CaskError::UnknownContainerFormat {
            token: token.clone(),
            path: path.to_path_buf(),
        })?;

    debug!(path = %path.display(), container = %kind, "Detected container");
    Ok(kind)
}

/// Unpacks one container into a staging directory.
pub struct Extractor<'a> {
    pub kind: ContainerKind,
    source: PathBuf,
    /// Name given to files that are staged as-is.
    target_name: String,
    runner: &'a dyn CommandRunner,
}

impl std::fmt::Debug for Extractor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl<'a> Extractor<'a> {
    /// `target_name` is used by formats staged without unpacking; an empty
    /// name falls back to the source file name.
    pub fn new(
        kind: ContainerKind,
        source: &Path,
        target_name: &str,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        let target_name = if target_name.is_empty() {
            source
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
        } else {
            target_name.to_string()
        };
        Self {
            kind,
            source: source.to_path_buf(),
            target_name,
            runner,
        }
    }

    /// Extract into `dest`, which must already exist.
    ///
    /// On failure `dest` may hold partial output; the caller purges it.
    ///
    /// # Errors
    ///
    /// Any I/O or subprocess failure.
    pub fn extract(&self, dest: &Path, verbose: bool) -> Result<()> {
        let ctx = || format!("extracting {} into {}", self.source.display(), dest.display());
        let src = self.source.as_path();

        match self.kind {
            ContainerKind::Zip => extract_zip(src, dest).map_err(CaskError::io(ctx()))?,
            ContainerKind::Tar => self.extract_tar(src, dest, verbose)?,
            ContainerKind::Gzip => {
                let out = dest.join(strip_suffix(&self.target_name, &[".gz", ".gzip"]));
                let file = File::open(src).map_err(CaskError::io(ctx()))?;
                let mut decoder = GzDecoder::new(BufReader::new(file));
                let mut target = File::create(&out).map_err(CaskError::io(ctx()))?;
                io::copy(&mut decoder, &mut target).map_err(CaskError::io(ctx()))?;
            }
            ContainerKind::Bzip2 => {
                self.decompress_in_place(dest, "/usr/bin/bunzip2", &[".bz2", ".bz"], verbose)?;
            }
            ContainerKind::Lzma => self.decompress_in_place(dest, "unlzma", &[".lzma"], verbose)?,
            ContainerKind::Xz => self.decompress_in_place(dest, "unxz", &[".xz"], verbose)?,
            ContainerKind::Dmg => self.extract_dmg(dest, verbose)?,
            ContainerKind::Xar => self.run(
                SystemCommand::new("/usr/bin/xar")
                    .args(["-x", "-f"])
                    .arg(src)
                    .arg("-C")
                    .arg(dest),
                verbose,
            )?,
            ContainerKind::Xip => self.run(
                SystemCommand::new("/usr/bin/xip")
                    .arg("--expand")
                    .arg(src)
                    .current_dir(dest),
                verbose,
            )?,
            ContainerKind::Cab => self.run(
                SystemCommand::new("cabextract")
                    .arg("-d")
                    .arg(dest)
                    .arg("--")
                    .arg(src),
                verbose,
            )?,
            ContainerKind::Air => self.run(
                SystemCommand::new(AIR_INSTALLER)
                    .args(["-silent", "-location"])
                    .arg(dest)
                    .arg(src),
                verbose,
            )?,
            ContainerKind::SevenZip
            | ContainerKind::Sit
            | ContainerKind::Rar
            | ContainerKind::GenericUnar => self.run(
                SystemCommand::new("unar")
                    .args(["-force-overwrite", "-quiet", "-no-directory", "-output-directory"])
                    .arg(dest)
                    .arg("--")
                    .arg(src),
                verbose,
            )?,
            ContainerKind::Pkg | ContainerKind::Ttf | ContainerKind::Otf | ContainerKind::Naked => {
                copy_as_is(src, &dest.join(&self.target_name)).map_err(CaskError::io(ctx()))?;
            }
        }

        debug!(container = %self.kind, dest = %dest.display(), "Extracted");
        Ok(())
    }

    fn run(&self, cmd: SystemCommand, verbose: bool) -> Result<()> {
        let out = self.runner.run(&cmd)?;
        if verbose && !out.stdout.trim().is_empty() {
            info!(command = %cmd.program_name(), "{}", out.stdout.trim_end());
        }
        Ok(())
    }

    fn extract_tar(&self, src: &Path, dest: &Path, verbose: bool) -> Result<()> {
        let ctx = || format!("extracting {}", src.display());
        let mut magic = [0u8; 4];
        let read = File::open(src)
            .and_then(|mut f| f.read(&mut magic))
            .map_err(CaskError::io(ctx()))?;
        let magic = &magic[..read];

        let file = || File::open(src).map(BufReader::new);
        if magic.starts_with(MAGIC_GZIP) {
            let reader = file().map_err(CaskError::io(ctx()))?;
            unpack_tar(GzDecoder::new(reader), dest).map_err(CaskError::io(ctx()))
        } else if magic.starts_with(MAGIC_ZSTD) {
            let reader = file()
                .and_then(ZstdDecoder::with_buffer)
                .map_err(CaskError::io(ctx()))?;
            unpack_tar(reader, dest).map_err(CaskError::io(ctx()))
        } else if magic.starts_with(MAGIC_BZIP2)
            || magic.starts_with(MAGIC_XZ)
            || magic.starts_with(MAGIC_LZMA)
        {
            self.run(
                SystemCommand::new("/usr/bin/tar")
                    .arg("-xf")
                    .arg(src)
                    .arg("-C")
                    .arg(dest),
                verbose,
            )
        } else {
            let reader = file().map_err(CaskError::io(ctx()))?;
            unpack_tar(reader, dest).map_err(CaskError::io(ctx()))
        }
    }

    fn decompress_in_place(
        &self,
        dest: &Path,
        tool: &str,
        suffixes: &[&str],
        verbose: bool,
    ) -> Result<()> {
        // The tools exit non-zero on a name without one of their suffixes.
        let name = if suffixes.iter().any(|s| self.target_name.ends_with(s)) {
            self.target_name.clone()
        } else {
            format!("{}{}", self.target_name, suffixes[0])
        };
        let copy = dest.join(name);
        fs::copy(&self.source, &copy)
            .map_err(CaskError::io(format!("copying {}", self.source.display())))?;
        self.run(
            SystemCommand::new(tool).args(["-q", "-f"]).arg(&copy),
            verbose,
        )
    }

    fn extract_dmg(&self, dest: &Path, verbose: bool) -> Result<()> {
        let mounts = dmg::attach(self.runner, &self.source)?;
        for mount in &mounts {
            let entries = fs::read_dir(&mount.path)
                .map_err(CaskError::io(format!("reading {}", mount.path.display())))?;
            for entry in entries.flatten() {
                let name = entry.file_name();
                if DMG_SKIP.iter().any(|s| name == *s) {
                    continue;
                }
                self.run(
                    SystemCommand::new("/usr/bin/ditto")
                        .arg("--")
                        .arg(entry.path())
                        .arg(dest.join(&name)),
                    verbose,
                )?;
            }
        }
        Ok(())
    }
}

fn strip_suffix<'s>(name: &'s str, suffixes: &[&str]) -> &'s str {
    suffixes
        .iter()
        .find_map(|s| name.strip_suffix(s))
        .filter(|s| !s.is_empty())
        .unwrap_or(name)
}

/// Stage a file or bundle directory without unpacking it.
fn copy_as_is(src: &Path, dest: &Path) -> io::Result<()> {
    if src.is_dir() {
        let options = fs_extra::dir::CopyOptions::new().copy_inside(true);
        fs_extra::dir::copy(src, dest, &options)
            .map(|_| ())
            .map_err(io::Error::other)
    } else {
        fs::copy(src, dest).map(|_| ())
    }
}

/// Extract a tar archive from a reader
fn unpack_tar<R: Read>(reader: R, dest_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        // Sanitize path to prevent Zip Slip
        if !entry.unpack_in(dest_dir)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid path in archive: {}", entry.path()?.display()),
            ));
        }
    }

    Ok(())
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(io::Error::other)?;

    fs::create_dir_all(dest_dir)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(io::Error::other)?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid path in archive: {}", file.name()),
            ));
        };

        let absolute_path = dest_dir.join(&relative_path);
        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;

            if mode & 0o170_000 == 0o120_000 {
                let mut target = String::new();
                file.read_to_string(&mut target)?;
                std::os::unix::fs::symlink(target, &absolute_path)?;
                continue;
            }

            let mut outfile = File::create(&absolute_path)?;
            io::copy(&mut file, &mut outfile)?;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
            continue;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::error::CommandError;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    /// Every subprocess fails, as on a machine without the tools.
    struct NoTools;

    impl CommandRunner for NoTools {
        fn run(&self, cmd: &SystemCommand) -> std::result::Result<CommandOutput, CommandError> {
            Err(CommandError::Spawn {
                command: cmd.to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        }
    }

    fn token() -> Token {
        Token::new("foo")
    }

    fn write(path: &Path, bytes: &[u8]) {
        fs::write(path, bytes).unwrap();
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_explicit_lookup() {
        let p = Path::new("/nonexistent");
        assert_eq!(detect(&token(), p, Some("naked"), &NoTools).unwrap(), ContainerKind::Naked);
        assert_eq!(detect(&token(), p, Some("7z"), &NoTools).unwrap(), ContainerKind::SevenZip);
        assert!(matches!(
            detect(&token(), p, Some("floppy"), &NoTools),
            Err(CaskError::UnknownContainerType { kind, .. }) if kind == "floppy"
        ));
    }

    #[test]
    fn test_explicit_only_kinds_never_autodetect() {
        assert!(!ContainerKind::AUTODETECT.contains(&ContainerKind::Naked));
        assert!(!ContainerKind::AUTODETECT.contains(&ContainerKind::GenericUnar));
    }

    #[test]
    fn test_detect_by_magic() {
        let dir = tempdir().unwrap();
        let cases: Vec<(&str, Vec<u8>, ContainerKind)> = vec![
            ("a.bin", zip_bytes(&[("x", b"1")]), ContainerKind::Zip),
            ("b.bin", tar_bytes(&[("x", b"1")]), ContainerKind::Tar),
            ("c.bin", b"BZh91AY&SY".to_vec(), ContainerKind::Bzip2),
            ("d.bin", vec![0x1F, 0x8B, 8, 0, 0, 0], ContainerKind::Gzip),
            ("e.bin", MAGIC_XZ.to_vec(), ContainerKind::Xz),
            ("f.bin", b"Rar!\x1a\x07\x00".to_vec(), ContainerKind::Rar),
            ("g.bin", b"OTTO\x00\x0a".to_vec(), ContainerKind::Otf),
            ("h.bin", MAGIC_7Z.to_vec(), ContainerKind::SevenZip),
            ("i.air", b"anything".to_vec(), ContainerKind::Air),
        ];
        for (name, bytes, expected) in cases {
            let path = dir.path().join(name);
            write(&path, &bytes);
            assert_eq!(detect(&token(), &path, None, &NoTools).unwrap(), expected, "{name}");
        }
    }

    #[test]
    fn test_detect_dmg_trailer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.dmg");
        let mut bytes = vec![0u8; 4096];
        bytes.extend_from_slice(b"koly");
        bytes.extend_from_slice(&[0u8; 508]);
        write(&path, &bytes);
        assert_eq!(detect(&token(), &path, None, &NoTools).unwrap(), ContainerKind::Dmg);
    }

    #[test]
    fn test_gzipped_tar_is_tar_not_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.tgz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&tar_bytes(&[("Foo.app/Contents/Info.plist", b"<plist/>")]))
            .unwrap();
        write(&path, &enc.finish().unwrap());

        assert_eq!(detect(&token(), &path, None, &NoTools).unwrap(), ContainerKind::Tar);

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        Extractor::new(ContainerKind::Tar, &path, "", &NoTools)
            .extract(&dest, false)
            .unwrap();
        assert!(dest.join("Foo.app/Contents/Info.plist").is_file());
    }

    #[test]
    fn test_xar_wins_over_tar_payload() {
        // Valid xar magic with a ustar marker where a tar header would carry it.
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.xar");
        let mut bytes = tar_bytes(&[("payload", b"data")]);
        bytes[..4].copy_from_slice(MAGIC_XAR);
        write(&path, &bytes);

        assert!(has_ustar(&bytes));
        assert_eq!(detect(&token(), &path, None, &NoTools).unwrap(), ContainerKind::Xar);
    }

    struct XipListing;

    impl CommandRunner for XipListing {
        fn run(&self, _: &SystemCommand) -> std::result::Result<CommandOutput, CommandError> {
            Ok(CommandOutput::ok("Content\nMetadata\n"))
        }
    }

    #[test]
    fn test_xip_needs_listing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Foo.xip");
        write(&path, b"xar!\x00\x1c");
        assert_eq!(detect(&token(), &path, None, &XipListing).unwrap(), ContainerKind::Xip);
        assert_eq!(detect(&token(), &path, None, &NoTools).unwrap(), ContainerKind::Xar);
    }

    #[test]
    fn test_pkg_bundle_directory() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("Foo.pkg");
        fs::create_dir_all(pkg.join("Contents")).unwrap();
        assert_eq!(detect(&token(), &pkg, None, &NoTools).unwrap(), ContainerKind::Pkg);

        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();
        Extractor::new(ContainerKind::Pkg, &pkg, "Foo.pkg", &NoTools)
            .extract(&dest, false)
            .unwrap();
        assert!(dest.join("Foo.pkg/Contents").is_dir());
    }

    #[test]
    fn test_unknown_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mystery");
        write(&path, b"just some text");
        assert!(matches!(
            detect(&token(), &path, None, &NoTools),
            Err(CaskError::UnknownContainerFormat { .. })
        ));
    }

    #[test]
    fn test_zip_extraction_keeps_modes_and_symlinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let opts = SimpleFileOptions::default().unix_permissions(0o755);
        writer.add_directory("Foo.app/Contents/MacOS/", opts).unwrap();
        writer.start_file("Foo.app/Contents/MacOS/foo", opts).unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer
            .add_symlink("Foo.app/Contents/MacOS/link", "foo", opts)
            .unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        Extractor::new(ContainerKind::Zip, &path, "", &NoTools)
            .extract(&dest, false)
            .unwrap();

        let bin = dest.join("Foo.app/Contents/MacOS/foo");
        assert!(bin.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&bin).unwrap().permissions().mode() & 0o777, 0o755);
            let link = dest.join("Foo.app/Contents/MacOS/link");
            assert_eq!(fs::read_link(link).unwrap(), PathBuf::from("foo"));
        }
    }

    #[test]
    fn test_tar_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evil.tar");

        let mut data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data);
            let mut header = tar::Header::new_gnu();
            header.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../escape");
            header.set_size(1);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &b"x"[..]).unwrap();
            builder.finish().unwrap();
        }
        write(&path, &data);

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        let result = Extractor::new(ContainerKind::Tar, &path, "", &NoTools).extract(&dest, false);
        assert!(result.is_err());
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_naked_uses_target_name() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo--1.0");
        write(&src, b"#!/bin/sh\n");

        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();
        Extractor::new(ContainerKind::Naked, &src, "foo-installer.sh", &NoTools)
            .extract(&dest, false)
            .unwrap();
        assert!(dest.join("foo-installer.sh").is_file());
    }

    #[test]
    fn test_gzip_stream() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo--1.0.gz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"plain text").unwrap();
        write(&src, &enc.finish().unwrap());

        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();
        Extractor::new(ContainerKind::Gzip, &src, "notes.txt.gz", &NoTools)
            .extract(&dest, false)
            .unwrap();
        assert_eq!(fs::read_to_string(dest.join("notes.txt")).unwrap(), "plain text");
    }

    #[derive(Default)]
    struct Recorder {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, cmd: &SystemCommand) -> std::result::Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(cmd.to_string());
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_stream_copy_gets_tool_suffix() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo--1.0");
        write(&src, MAGIC_XZ);
        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let runner = Recorder::default();
        Extractor::new(ContainerKind::Xz, &src, "download", &runner)
            .extract(&dest, false)
            .unwrap();
        Extractor::new(ContainerKind::Bzip2, &src, "notes.bz2", &runner)
            .extract(&dest, false)
            .unwrap();

        assert!(dest.join("download.xz").is_file());
        assert!(dest.join("notes.bz2").is_file());
        let calls = runner.calls.lock().unwrap();
        assert!(calls[0].starts_with("unxz -q -f "), "{calls:?}");
        assert!(calls[0].ends_with("download.xz"), "{calls:?}");
        assert!(calls[1].ends_with("notes.bz2"), "{calls:?}");
    }

    #[test]
    fn test_failing_tool_propagates() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo.cab");
        write(&src, b"MSCF");
        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let err = Extractor::new(ContainerKind::Cab, &src, "", &NoTools)
            .extract(&dest, false)
            .unwrap_err();
        assert!(matches!(err, CaskError::Command(CommandError::Spawn { .. })));
    }
}
