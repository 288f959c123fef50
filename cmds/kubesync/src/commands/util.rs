//! Output helpers for command handlers.

use std::io::{self, ErrorKind, Write};

/// Stdout writer for `--print` that stops writing once the reader goes away.
///
/// After the first `EPIPE` every further write is discarded and reported as
/// successful, so `kubesync --print ... | head` exits cleanly.
pub struct PipeWriter<W> {
	inner: W,
	closed: bool,
}

impl<W> PipeWriter<W> {
	pub fn new(inner: W) -> Self {
		Self {
			inner,
			closed: false,
		}
	}

	/// Whether the reading end has been closed.
	pub fn is_closed(&self) -> bool {
		self.closed
	}

	fn swallow_broken_pipe<T>(&mut self, result: io::Result<T>, on_close: T) -> io::Result<T> {
		match result {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => {
				self.closed = true;
				Ok(on_close)
			}
			other => other,
		}
	}
}

impl<W: Write> Write for PipeWriter<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if self.closed {
			return Ok(buf.len());
		}
		let result = self.inner.write(buf);
		self.swallow_broken_pipe(result, buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		if self.closed {
			return Ok(());
		}
		let result = self.inner.flush();
		self.swallow_broken_pipe(result, ())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct ClosedPipe {
		attempts: usize,
	}

	impl Write for ClosedPipe {
		fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
			self.attempts += 1;
			Err(io::Error::from(ErrorKind::BrokenPipe))
		}

		fn flush(&mut self) -> io::Result<()> {
			Err(io::Error::from(ErrorKind::BrokenPipe))
		}
	}

	#[test]
	fn test_broken_pipe_is_swallowed_once() {
		let mut writer = PipeWriter::new(ClosedPipe { attempts: 0 });
		writer.write_all(b"---\n").unwrap();
		writer.write_all(b"kind: Service\n").unwrap();
		writer.flush().unwrap();

		assert!(writer.is_closed());
		assert_eq!(writer.inner.attempts, 1);
	}

	#[test]
	fn test_other_errors_propagate() {
		struct Full;
		impl Write for Full {
			fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
				Err(io::Error::from(ErrorKind::Other))
			}
			fn flush(&mut self) -> io::Result<()> {
				Ok(())
			}
		}

		let mut writer = PipeWriter::new(Full);
		assert!(writer.write(b"x").is_err());
		assert!(!writer.is_closed());
	}
}
