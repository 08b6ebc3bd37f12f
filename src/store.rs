use anyhow::Context;
use std::path::Path;

use otpkeep::{Node, Record};

/// Reads and decodes a record file. A sealed secret stays locked when
/// `password` is `None` or wrong.
pub fn load_record(path: &Path, password: Option<&str>) -> anyhow::Result<(Record, bool)> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read record file {}", path.display()))?;
    let node = Node::parse(&data)?;
    let mut record = Record::new();
    let changed = record.read_from(&node, password)?;
    Ok((record, changed))
}

/// Writes the record through a temporary file so a crash never leaves half a document.
pub fn save_record(path: &Path, record: &Record) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let xml = record.to_node()?.to_xml()?;
    let tmp = path.with_extension("xml.tmp");
    std::fs::write(&tmp, xml)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("cannot write record file {}", path.display()))?;
    Ok(())
}
