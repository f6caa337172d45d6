//! Host platform detection and the names release archives use for it.

pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use std::fmt;

/// Architecture and OS of a build host, displayed as `x86_64-linux`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// The running host, or `None` if its OS or architecture is unsupported.
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// `<os>-<arch>` suffix of a `.tar.gz` release archive, e.g. `darwin-arm64`.
  pub fn tarball_suffix(&self) -> Option<String> {
    let os = self.os.tarball_name()?;
    Some(format!("{}-{}", os, self.arch.tarball_name()))
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.arch, self.os)
  }
}
