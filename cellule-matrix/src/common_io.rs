use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn is_gzipped(path: &str) -> bool {
    Path::new(path).extension() == Some(OsStr::new("gz"))
}

/// Open a buffered reader over a plain or gzipped file.
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    if is_gzipped(input_file) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Open a buffered writer, creating parent directories as needed.
/// A `.gz` suffix selects gzip compression.
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if let Some(parent_dir) = Path::new(output_file).parent() {
        std::fs::create_dir_all(parent_dir)?;
    }
    let file = File::create(output_file)?;
    if is_gzipped(output_file) {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Read every line of the input file into memory.
///
/// * `input_file` - file name, either gzipped or not
pub fn read_lines(input_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for x in buf.lines() {
        lines.push(x?.into_boxed_str());
    }
    Ok(lines)
}

/// Write one displayable item per line into the output file.
///
/// * `lines` - vector of items
/// * `output_file` - file name, either gzipped or not
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<Box<str>> = vec!["alpha".into(), "beta\tgamma".into(), "".into()];

        for name in ["plain.txt", "compressed.txt.gz"] {
            let path = dir.path().join(name).to_string_lossy().into_owned();
            write_lines(&lines, &path).unwrap();
            let back = read_lines(&path).unwrap();
            assert_eq!(back, lines);
        }
    }

    #[test]
    fn writer_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("a/b/c.txt")
            .to_string_lossy()
            .into_owned();
        write_lines(&["x"], &path).unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["x".into()]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_lines("/no/such/file.tsv").is_err());
    }
}
