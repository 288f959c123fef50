//! Multi-document YAML output for `--print`.

use std::io::Write;

use serde::Serialize;

/// Write `objects` as a YAML stream, each document introduced by `---`.
pub fn write_documents<W: Write, T: Serialize>(mut writer: W, objects: &[T]) -> anyhow::Result<()> {
	for obj in objects {
		writer.write_all(b"---\n")?;
		serde_yaml::to_writer(&mut writer, obj)?;
	}
	writer.flush()?;
	Ok(())
}
