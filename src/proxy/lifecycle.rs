use std::fmt;

/// Lifecycle of one proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Constructed, nothing run yet
  Parsed,
  Installing,
  /// Store populated; ready to replace any older instance
  Installed,
  Activating,
  /// Controlling clients and intercepting requests
  Activated,
  /// Install failed; this instance will never serve
  Redundant,
}

impl Lifecycle {
  /// Whether requests are routed through the cache policies.
  pub fn controls_clients(&self) -> bool {
    matches!(self, Self::Activated)
  }

  pub fn can_install(&self) -> bool {
    matches!(self, Self::Parsed)
  }

  pub fn can_activate(&self) -> bool {
    matches!(self, Self::Installed | Self::Activated)
  }
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_activated_controls() {
    for state in [
      Lifecycle::Parsed,
      Lifecycle::Installing,
      Lifecycle::Installed,
      Lifecycle::Activating,
      Lifecycle::Redundant,
    ] {
      assert!(!state.controls_clients(), "{state}");
    }
    assert!(Lifecycle::Activated.controls_clients());
  }

  #[test]
  fn test_transitions() {
    assert!(Lifecycle::Parsed.can_install());
    assert!(!Lifecycle::Installed.can_install());
    assert!(Lifecycle::Installed.can_activate());
    assert!(Lifecycle::Activated.can_activate());
    assert!(!Lifecycle::Parsed.can_activate());
    assert!(!Lifecycle::Redundant.can_activate());
  }
}
