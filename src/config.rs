//! Process-level JIT configuration from environment variables.
//!
//! | variable           | effect                                   | default |
//! |--------------------|------------------------------------------|---------|
//! | `TESSEL_NUM_WARPS` | default warps per program                | 4       |
//! | `TESSEL_ARCH`      | target architecture of emitted assembly  | sm_80   |
//! | `TESSEL_DUMP_IR`   | log KIR of every compilation at `info`   | off     |
//! | `TESSEL_MOD_RTOL`  | relative tolerance used by `testing`     | 0.01    |

use once_cell::sync::Lazy;

#[derive(Clone, Debug, PartialEq)]
pub struct JitConfig {
    pub num_warps: u32,
    pub arch: String,
    pub dump_ir: bool,
    pub rtol: f64,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            num_warps: 4,
            arch: "sm_80".to_string(),
            dump_ir: false,
            rtol: 0.01,
        }
    }
}

static GLOBAL: Lazy<JitConfig> = Lazy::new(JitConfig::from_env);

impl JitConfig {
    /// Read the environment. Malformed values fall back to the default
    /// with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// The configuration read once at first use.
    pub fn global() -> &'static JitConfig {
        &GLOBAL
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = lookup("TESSEL_NUM_WARPS") {
            match v.trim().parse::<u32>() {
                Ok(n) if valid_num_warps(n) => cfg.num_warps = n,
                _ => log::warn!("ignoring TESSEL_NUM_WARPS={}: expected a power of two in 1..=32", v),
            }
        }
        if let Some(v) = lookup("TESSEL_ARCH") {
            if v.starts_with("sm_") {
                cfg.arch = v;
            } else {
                log::warn!("ignoring TESSEL_ARCH={}: expected e.g. sm_80", v);
            }
        }
        if let Some(v) = lookup("TESSEL_DUMP_IR") {
            cfg.dump_ir = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("TESSEL_MOD_RTOL") {
            match v.trim().parse::<f64>() {
                Ok(r) if r >= 0.0 && r.is_finite() => cfg.rtol = r,
                _ => log::warn!("ignoring TESSEL_MOD_RTOL={}: expected a non-negative number", v),
            }
        }
        cfg
    }
}

pub fn valid_num_warps(n: u32) -> bool {
    n.is_power_of_two() && n <= 32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> JitConfig {
        let env: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JitConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(from_pairs(&[]), JitConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = from_pairs(&[
            ("TESSEL_NUM_WARPS", "8"),
            ("TESSEL_ARCH", "sm_90"),
            ("TESSEL_DUMP_IR", "1"),
            ("TESSEL_MOD_RTOL", "0.001"),
        ]);
        assert_eq!(cfg.num_warps, 8);
        assert_eq!(cfg.arch, "sm_90");
        assert!(cfg.dump_ir);
        assert_eq!(cfg.rtol, 0.001);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let cfg = from_pairs(&[
            ("TESSEL_NUM_WARPS", "3"),
            ("TESSEL_ARCH", "gfx90a"),
            ("TESSEL_MOD_RTOL", "-1"),
        ]);
        assert_eq!(cfg, JitConfig::default());
    }

    #[test]
    fn test_valid_num_warps() {
        assert!(valid_num_warps(1));
        assert!(valid_num_warps(32));
        assert!(!valid_num_warps(0));
        assert!(!valid_num_warps(64));
        assert!(!valid_num_warps(6));
    }
}
