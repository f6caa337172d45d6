use std::fmt;

/// Operating systems a build host can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  pub fn current() -> Option<Self> {
    Self::parse(std::env::consts::OS)
  }

  /// Parse a Rust-style OS name (`std::env::consts::OS`).
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Windows => "windows",
    }
  }

  /// Name used in `.tar.gz` release archive file names.
  ///
  /// Windows releases ship as zip archives, so there is none.
  pub fn tarball_name(&self) -> Option<&'static str> {
    match self {
      Self::Linux => Some("linux"),
      Self::MacOs => Some("darwin"),
      Self::Windows => None,
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
