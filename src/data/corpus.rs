// ============================================================
// Layer 4: Corpus Reader
// ============================================================
// Finds and parses the line-delimited JSON corpus.
//
// A configured data path is either
//   (1) a directory full of *.jsonl.gz / *.jsonl files, or
//   (2) a plain text manifest listing such directories, one
//       per line (relative entries resolve against the
//       manifest's own directory)
//
// Files inside a directory are read in sorted order, capped
// at max_files_per_dir, so every run sees the same records
// in the same order.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::domain::definition::CorpusRecord;
use crate::domain::error::{Result, SiameseError};

/// Resolve configured data paths into corpus directories.
pub fn expand_data_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for path in paths {
        dirs.extend(expand_data_path(path)?);
    }
    Ok(dirs)
}

pub fn expand_data_path(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_file() {
        return Err(SiameseError::not_found(path, "corpus directory or manifest"));
    }

    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let text = std::fs::read_to_string(path).map_err(SiameseError::io(path))?;
    let dirs = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            let p = PathBuf::from(l);
            if p.is_absolute() { p } else { base.join(p) }
        })
        .collect();
    Ok(dirs)
}

/// Corpus files of one directory, sorted, at most `max_files`.
pub fn list_corpus_files(dir: &Path, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SiameseError::not_found(dir, "corpus directory"));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(SiameseError::io(dir))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_corpus_file(p))
        .collect();
    files.sort();
    if let Some(max) = max_files {
        files.truncate(max);
    }
    Ok(files)
}

fn is_corpus_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".jsonl.gz") || name.ends_with(".jsonl")
}

/// Parse one file; gzip is detected by extension.
pub fn read_corpus_file(path: &Path) -> Result<Vec<CorpusRecord>> {
    let file = File::open(path).map_err(SiameseError::io(path))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut records = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(SiameseError::io(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: CorpusRecord = serde_json::from_str(&line).map_err(|e| {
            SiameseError::corrupt(path, "corpus jsonl record", format!("line {}: {e}", n + 1))
        })?;
        records.push(rec);
    }
    Ok(records)
}

/// First existing file among `<stem>.jsonl.gz` and `<stem>.jsonl`.
pub fn find_corpus_file(dir: &Path, stem: &str) -> Result<PathBuf> {
    for ext in ["jsonl.gz", "jsonl"] {
        let p = dir.join(format!("{stem}.{ext}"));
        if p.is_file() {
            return Ok(p);
        }
    }
    Err(SiameseError::not_found(dir.join(format!("{stem}.jsonl.gz")), "definitions file"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Write records as a gzip jsonl file.
    pub(crate) fn write_gz(path: &Path, lines: &[serde_json::Value]) {
        let file = File::create(path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        for l in lines {
            writeln!(enc, "{}", l).unwrap();
        }
        enc.finish().unwrap();
    }

    #[test]
    fn test_reads_gzip_and_plain_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_gz(
            &tmp.path().join("a.jsonl.gz"),
            &[serde_json::json!({"code_tokens": ["x"], "docstring_tokens": ["y"], "language": "go"})],
        );
        std::fs::write(
            tmp.path().join("b.jsonl"),
            "{\"function_tokens\": [\"def\"], \"identifier\": \"f\", \"url\": \"u\"}\n\n",
        ).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let files = list_corpus_files(tmp.path(), None).unwrap();
        assert_eq!(files.len(), 2);
        let a = read_corpus_file(&files[0]).unwrap();
        assert_eq!(a[0].language, "go");
        let b = read_corpus_file(&files[1]).unwrap();
        assert_eq!(b[0].identifier, "f");
    }

    #[test]
    fn test_max_files_per_dir() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(tmp.path().join(format!("{i}.jsonl")), "").unwrap();
        }
        assert_eq!(list_corpus_files(tmp.path(), Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_manifest_expands_relative_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("python")).unwrap();
        let manifest = tmp.path().join("dirs.txt");
        std::fs::write(&manifest, "python\n\n# comment\n").unwrap();
        let dirs = expand_data_path(&manifest).unwrap();
        assert_eq!(dirs, vec![tmp.path().join("python")]);
    }

    #[test]
    fn test_bad_line_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("bad.jsonl");
        std::fs::write(&p, "{oops}\n").unwrap();
        assert!(matches!(read_corpus_file(&p), Err(SiameseError::CorruptArtifact { .. })));
    }
}
