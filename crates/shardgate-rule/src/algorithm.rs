//! Algorithm catalog
//!
//! Rules refer to algorithms by name; each name binds an
//! [`AlgorithmConfig`] whose `type` must resolve against the closed set
//! below. Building an algorithm validates its props, so a compiled rule
//! never carries an algorithm that cannot run.
//!
//! | Family | Types |
//! |---|---|
//! | sharding | `INLINE`, `MOD`, `HASH_MOD` |
//! | key generation | `SNOWFLAKE`, `UUID` |
//! | load balance | `ROUND_ROBIN`, `RANDOM` |

use parking_lot::Mutex;
use rand::Rng;
use shardgate_common::{AlgorithmConfig, Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Value of a sharding column in a routed operation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardingValue {
    Int(i64),
    Text(String),
}

impl ShardingValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ShardingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ShardingValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ShardingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

fn unknown_type(name: &str, config: &AlgorithmConfig) -> Error {
    Error::UnknownAlgorithmType {
        name: name.to_string(),
        algorithm_type: config.algorithm_type.clone(),
    }
}

fn invalid_props(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAlgorithmProps {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn positive_prop(name: &str, config: &AlgorithmConfig, key: &str) -> Result<i64> {
    let raw = config
        .props
        .get(key)
        .ok_or_else(|| invalid_props(name, format!("missing '{key}'")))?;
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid_props(name, format!("'{key}' must be a positive integer: {raw}"))),
    }
}

/// Trailing decimal digits of a target name (`t_order_12` → 12)
fn numeric_suffix(target: &str) -> Option<i64> {
    let digits = target.len() - target.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    target[target.len() - digits..].parse().ok()
}

/// Standard sharding algorithm
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardingAlgorithm {
    /// `prefix${column % modulus}suffix`, or `prefix${column}suffix`
    Inline {
        prefix: String,
        column: String,
        modulus: Option<i64>,
        suffix: String,
    },
    /// `value % sharding-count` matched against the target's numeric suffix
    Mod { sharding_count: i64 },
    /// `hash(value) % sharding-count` matched against the numeric suffix
    HashMod { sharding_count: i64 },
}

impl ShardingAlgorithm {
    /// Build and validate a sharding algorithm
    pub fn build(name: &str, config: &AlgorithmConfig) -> Result<Self> {
        match config.algorithm_type.to_ascii_uppercase().as_str() {
            "INLINE" => {
                let expression = config
                    .props
                    .get("algorithm-expression")
                    .ok_or_else(|| invalid_props(name, "missing 'algorithm-expression'"))?;
                Self::parse_inline(name, expression)
            }
            "MOD" => Ok(Self::Mod {
                sharding_count: positive_prop(name, config, "sharding-count")?,
            }),
            "HASH_MOD" => Ok(Self::HashMod {
                sharding_count: positive_prop(name, config, "sharding-count")?,
            }),
            _ => Err(unknown_type(name, config)),
        }
    }

    fn parse_inline(name: &str, expression: &str) -> Result<Self> {
        let (open, open_len) = match (expression.find("${"), expression.find("$->{")) {
            (Some(d), _) => (d, 2),
            (None, Some(a)) => (a, 4),
            (None, None) => {
                return Err(invalid_props(name, format!("no placeholder in '{expression}'")));
            }
        };
        let body_start = open + open_len;
        let close = expression[body_start..]
            .find('}')
            .map(|i| i + body_start)
            .ok_or_else(|| invalid_props(name, format!("unclosed placeholder in '{expression}'")))?;
        let body = expression[body_start..close].trim();
        let (column, modulus) = match body.split_once('%') {
            Some((column, modulus)) => {
                let modulus: i64 = modulus
                    .trim()
                    .parse()
                    .ok()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| invalid_props(name, format!("bad modulus in '{expression}'")))?;
                (column.trim(), Some(modulus))
            }
            None => (body, None),
        };
        if column.is_empty() || !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(invalid_props(name, format!("bad column in '{expression}'")));
        }
        Ok(Self::Inline {
            prefix: expression[..open].to_string(),
            column: column.to_string(),
            modulus,
            suffix: expression[close + 1..].to_string(),
        })
    }

    /// Pick the target for `value` among `available`
    pub fn do_sharding<'a>(&self, available: &[&'a str], value: &ShardingValue) -> Option<&'a str> {
        match self {
            Self::Inline {
                prefix,
                modulus,
                suffix,
                ..
            } => {
                let rendered = match modulus {
                    Some(m) => value.as_int()?.rem_euclid(*m).to_string(),
                    None => value.to_string(),
                };
                let target = format!("{prefix}{rendered}{suffix}");
                available.iter().copied().find(|t| *t == target)
            }
            Self::Mod { sharding_count } => {
                let shard = value.as_int()?.rem_euclid(*sharding_count);
                available
                    .iter()
                    .copied()
                    .find(|t| numeric_suffix(t) == Some(shard))
            }
            Self::HashMod { sharding_count } => {
                let hash = xxhash_rust::xxh64::xxh64(value.to_string().as_bytes(), 0);
                let shard = (hash % (*sharding_count as u64)) as i64;
                available
                    .iter()
                    .copied()
                    .find(|t| numeric_suffix(t) == Some(shard))
            }
        }
    }
}

/// Generated key value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratedKey {
    Int(i64),
    Text(String),
}

/// 2016-11-01T00:00:00Z in milliseconds
const SNOWFLAKE_EPOCH_MS: u64 = 1_477_958_400_000;
const SNOWFLAKE_SEQUENCE_BITS: u32 = 12;
const SNOWFLAKE_WORKER_BITS: u32 = 10;
const SNOWFLAKE_MAX_WORKER_ID: i64 = (1 << SNOWFLAKE_WORKER_BITS) - 1;

/// Key generation algorithm
#[derive(Debug)]
pub enum KeyGenerator {
    Snowflake {
        worker_id: i64,
        /// (last millisecond, sequence within it)
        state: Mutex<(u64, u64)>,
    },
    Uuid,
}

impl KeyGenerator {
    /// Build and validate a key generator
    pub fn build(name: &str, config: &AlgorithmConfig) -> Result<Self> {
        match config.algorithm_type.to_ascii_uppercase().as_str() {
            "SNOWFLAKE" => {
                let worker_id = match config.props.get("worker-id") {
                    None => 0,
                    Some(raw) => raw
                        .trim()
                        .parse::<i64>()
                        .ok()
                        .filter(|id| (0..=SNOWFLAKE_MAX_WORKER_ID).contains(id))
                        .ok_or_else(|| {
                            invalid_props(
                                name,
                                format!("'worker-id' must be within 0..={SNOWFLAKE_MAX_WORKER_ID}: {raw}"),
                            )
                        })?,
                };
                Ok(Self::Snowflake {
                    worker_id,
                    state: Mutex::new((0, 0)),
                })
            }
            "UUID" => Ok(Self::Uuid),
            _ => Err(unknown_type(name, config)),
        }
    }

    /// Generate the next key
    pub fn generate(&self) -> GeneratedKey {
        match self {
            Self::Snowflake { worker_id, state } => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                let mut state = state.lock();
                let (last, seq) = *state;
                // Clock never moves backwards for the generator; borrow the next
                // sequence slot of the last millisecond instead.
                let millis = now.max(last);
                let (millis, seq) = if millis == last {
                    let next = (seq + 1) & ((1 << SNOWFLAKE_SEQUENCE_BITS) - 1);
                    if next == 0 { (last + 1, 0) } else { (last, next) }
                } else {
                    (millis, 0)
                };
                *state = (millis, seq);
                let id = ((millis.saturating_sub(SNOWFLAKE_EPOCH_MS))
                    << (SNOWFLAKE_SEQUENCE_BITS + SNOWFLAKE_WORKER_BITS))
                    | ((*worker_id as u64) << SNOWFLAKE_SEQUENCE_BITS)
                    | seq;
                GeneratedKey::Int(id as i64)
            }
            Self::Uuid => GeneratedKey::Text(uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

/// Load balance algorithm for read data sources
#[derive(Debug)]
pub enum LoadBalanceAlgorithm {
    RoundRobin { next: AtomicUsize },
    Random,
}

impl LoadBalanceAlgorithm {
    /// Round robin, the default when a group names no load balancer
    #[must_use]
    pub fn round_robin() -> Self {
        Self::RoundRobin {
            next: AtomicUsize::new(0),
        }
    }

    /// Build and validate a load balancer
    pub fn build(name: &str, config: &AlgorithmConfig) -> Result<Self> {
        match config.algorithm_type.to_ascii_uppercase().as_str() {
            "ROUND_ROBIN" => Ok(Self::round_robin()),
            "RANDOM" => Ok(Self::Random),
            _ => Err(unknown_type(name, config)),
        }
    }

    /// Type name as configured
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::RoundRobin { .. } => "ROUND_ROBIN",
            Self::Random => "RANDOM",
        }
    }

    /// Pick one of `candidates`
    pub fn select<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        let index = match self {
            Self::RoundRobin { next } => next.fetch_add(1, Ordering::Relaxed) % candidates.len(),
            Self::Random => rand::thread_rng().gen_range(0..candidates.len()),
        };
        Some(candidates[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_algorithm() {
        let config = AlgorithmConfig::new("INLINE")
            .with_prop("algorithm-expression", "t_order_${order_id % 2}");
        let algorithm = ShardingAlgorithm::build("t_order_inline", &config).unwrap();
        let targets = ["t_order_0", "t_order_1"];
        assert_eq!(algorithm.do_sharding(&targets, &ShardingValue::Int(7)), Some("t_order_1"));
        assert_eq!(algorithm.do_sharding(&targets, &ShardingValue::Int(-4)), Some("t_order_0"));
        assert_eq!(algorithm.do_sharding(&targets, &"x".into()), None);
    }

    #[test]
    fn test_inline_algorithm_requires_expression() {
        let err = ShardingAlgorithm::build("a", &AlgorithmConfig::new("INLINE")).unwrap_err();
        assert!(matches!(err, Error::InvalidAlgorithmProps { .. }));
        let err = ShardingAlgorithm::build(
            "a",
            &AlgorithmConfig::new("INLINE").with_prop("algorithm-expression", "t_${id % 0}"),
        )
        .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_mod_algorithm() {
        let config = AlgorithmConfig::new("MOD").with_prop("sharding-count", "4");
        let algorithm = ShardingAlgorithm::build("m", &config).unwrap();
        let targets = ["ds_0", "ds_1", "ds_2", "ds_3"];
        assert_eq!(algorithm.do_sharding(&targets, &ShardingValue::Int(10)), Some("ds_2"));
        assert_eq!(algorithm.do_sharding(&targets, &"13".into()), Some("ds_1"));
    }

    #[test]
    fn test_hash_mod_is_deterministic() {
        let config = AlgorithmConfig::new("hash_mod").with_prop("sharding-count", "2");
        let algorithm = ShardingAlgorithm::build("h", &config).unwrap();
        let targets = ["t_0", "t_1"];
        let first = algorithm.do_sharding(&targets, &"alice".into());
        assert!(first.is_some());
        assert_eq!(first, algorithm.do_sharding(&targets, &"alice".into()));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = ShardingAlgorithm::build("x", &AlgorithmConfig::new("VOLUME_RANGE")).unwrap_err();
        assert!(matches!(err, Error::UnknownAlgorithmType { ref algorithm_type, .. } if algorithm_type == "VOLUME_RANGE"));
        assert!(LoadBalanceAlgorithm::build("lb", &AlgorithmConfig::new("WEIGHT")).is_err());
        assert!(KeyGenerator::build("kg", &AlgorithmConfig::new("AUTO")).is_err());
    }

    #[test]
    fn test_snowflake_keys_increase() {
        let generator = KeyGenerator::build(
            "snowflake",
            &AlgorithmConfig::new("SNOWFLAKE").with_prop("worker-id", "3"),
        )
        .unwrap();
        let GeneratedKey::Int(a) = generator.generate() else {
            panic!("expected integer key");
        };
        let GeneratedKey::Int(b) = generator.generate() else {
            panic!("expected integer key");
        };
        assert!(b > a);
        assert_eq!((a >> SNOWFLAKE_SEQUENCE_BITS) & SNOWFLAKE_MAX_WORKER_ID, 3);
    }

    #[test]
    fn test_snowflake_worker_id_range() {
        let config = AlgorithmConfig::new("SNOWFLAKE").with_prop("worker-id", "4096");
        assert!(KeyGenerator::build("snowflake", &config).is_err());
    }

    #[test]
    fn test_round_robin() {
        let lb = LoadBalanceAlgorithm::round_robin();
        let reads = ["read_ds_0", "read_ds_1"];
        assert_eq!(lb.select(&reads), Some("read_ds_0"));
        assert_eq!(lb.select(&reads), Some("read_ds_1"));
        assert_eq!(lb.select(&reads), Some("read_ds_0"));
        assert_eq!(lb.select(&[]), None);
    }

    #[test]
    fn test_random_stays_in_candidates() {
        let lb = LoadBalanceAlgorithm::build("r", &AlgorithmConfig::new("RANDOM")).unwrap();
        let reads = ["a", "b", "c"];
        for _ in 0..32 {
            assert!(reads.contains(&lb.select(&reads).unwrap()));
        }
    }
}
