//! Line-oriented terminal interaction.
//!
//! Every prompt the session shows goes through [`UserInterface`], so tests can
//! drive a whole session with a [`std::io::Cursor`] and read back what was
//! printed.

use anyhow::Result;
use std::fs::File;
use std::io::{self, BufRead, Read, Stdout, Write};
use std::os::fd::AsFd;
use tracing::info;

pub trait UserInterface {
    /// Shows `prompt` and reads one line, trimmed.
    ///
    /// Returns `None` at end of input.
    fn ask(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Asks a yes/no question. Empty input means yes, end of input means no.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Prints one message line.
    fn say(&mut self, message: &str) -> Result<()>;
}

/// [`UserInterface`] over any reader and writer.
pub struct Terminal<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl Terminal<ByteReader<File>, Stdout> {
    /// Terminal bound to the process's stdin and stdout.
    ///
    /// Stdin is read a byte at a time so that piped input past the current
    /// answer is left for the commands we run.
    pub fn stdio() -> Result<Self> {
        let stdin = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        Ok(Self::new(ByteReader::new(stdin), io::stdout()))
    }
}

/// A [`BufRead`] that never reads ahead more than one byte.
pub struct ByteReader<R> {
    inner: R,
    byte: [u8; 1],
    filled: bool,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            byte: [0],
            filled: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ByteReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for ByteReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if !self.filled {
            let n = loop {
                match self.inner.read(&mut self.byte) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                return Ok(&[]);
            }
            self.filled = true;
        }
        Ok(&self.byte)
    }

    fn consume(&mut self, amt: usize) {
        if amt > 0 {
            self.filled = false;
        }
    }
}

impl<R: BufRead, W: Write> UserInterface for Terminal<R, W> {
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        self.read_line()
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            write!(self.output, "{} (Y/n): ", question)?;
            self.output.flush()?;

            let Some(answer) = self.read_line()? else {
                writeln!(self.output)?;
                return Ok(false);
            };

            match answer.to_lowercase().as_str() {
                "" | "y" | "yes" => {
                    info!("User confirmed: {}", question);
                    return Ok(true);
                }
                "n" | "no" => {
                    info!("User declined: {}", question);
                    return Ok(false);
                }
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }

    fn say(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{}", message)?;
        Ok(())
    }
}
