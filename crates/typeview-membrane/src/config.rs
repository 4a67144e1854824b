//! Runtime safety and target layout configuration.
//!
//! The safety level is set via the `TYPEVIEW_SAFETY` environment variable:
//! - `checked` (default): runtime safety checks that a debug foreign build
//!   carries are enforced on the host side too. Reading an inactive member of
//!   a bare union fails instead of reinterpreting bytes.
//! - `unchecked`: mirrors an optimized foreign build. Views read whatever bytes
//!   are stored, no hidden selector is consulted.

use std::sync::OnceLock;

/// Runtime safety mode for views.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// Runtime safety checks are enforced.
    #[default]
    Checked,
    /// Runtime safety checks are skipped, matching optimized foreign builds.
    Unchecked,
}

impl SafetyLevel {
    /// Case-insensitive; unknown names fall back to `Checked`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "checked" | "safe" | "debug" | "default" => Self::Checked,
            "unchecked" | "fast" | "release" | "small" | "off" => Self::Unchecked,
            _ => Self::Checked,
        }
    }

    /// Returns true if runtime safety checks are active.
    #[must_use]
    pub const fn checks_enabled(self) -> bool {
        matches!(self, Self::Checked)
    }
}

static GLOBAL_LEVEL: OnceLock<SafetyLevel> = OnceLock::new();

/// Process-wide safety level from `TYPEVIEW_SAFETY`, read once.
#[must_use]
pub fn safety_level() -> SafetyLevel {
    *GLOBAL_LEVEL.get_or_init(|| {
        std::env::var("TYPEVIEW_SAFETY")
            .map(|v| SafetyLevel::from_str_loose(&v))
            .unwrap_or_default()
    })
}

/// Byte order of multi-byte scalars in foreign memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the machine running the host.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    #[must_use]
    pub const fn is_little(self) -> bool {
        matches!(self, Self::Little)
    }
}

/// Layout and safety parameters shared by every view of one loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembraneConfig {
    /// Runtime safety mode.
    pub safety: SafetyLevel,
    /// Byte order of the foreign target.
    pub endianness: Endianness,
    /// Width of a foreign address word in bytes (4 or 8).
    pub address_size: usize,
    /// Linear memory page size in bytes.
    pub page_size: usize,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            safety: SafetyLevel::Checked,
            endianness: Endianness::Little,
            address_size: 4,
            page_size: 65_536,
        }
    }
}

impl MembraneConfig {
    /// Default layout with the safety level taken from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            safety: safety_level(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety = safety;
        self
    }

    #[must_use]
    pub const fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    #[must_use]
    pub const fn with_address_size(mut self, address_size: usize) -> Self {
        self.address_size = address_size;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_names_parse_loosely() {
        assert_eq!(SafetyLevel::from_str_loose("checked"), SafetyLevel::Checked);
        assert_eq!(SafetyLevel::from_str_loose("CHECKED"), SafetyLevel::Checked);
        assert_eq!(SafetyLevel::from_str_loose("debug"), SafetyLevel::Checked);
        assert_eq!(
            SafetyLevel::from_str_loose("unchecked"),
            SafetyLevel::Unchecked
        );
        assert_eq!(SafetyLevel::from_str_loose("release"), SafetyLevel::Unchecked);
        assert_eq!(SafetyLevel::from_str_loose("fast"), SafetyLevel::Unchecked);
        assert_eq!(SafetyLevel::from_str_loose("bogus"), SafetyLevel::Checked);
    }

    #[test]
    fn default_is_checked() {
        assert_eq!(SafetyLevel::default(), SafetyLevel::Checked);
        assert!(SafetyLevel::Checked.checks_enabled());
        assert!(!SafetyLevel::Unchecked.checks_enabled());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = MembraneConfig::default()
            .with_safety(SafetyLevel::Unchecked)
            .with_address_size(8)
            .with_endianness(Endianness::Big);
        assert_eq!(config.safety, SafetyLevel::Unchecked);
        assert_eq!(config.address_size, 8);
        assert!(!config.endianness.is_little());
        assert_eq!(config.page_size, 65_536);
    }
}
