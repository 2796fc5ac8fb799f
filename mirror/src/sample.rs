//! Uniform endpoint sampling from configured pools.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::range::{AddressRange, ParseError, PortRange, parse_endpoint_spec};

/// Ordered, non-empty set of `(AddressRange, PortRange)` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPool {
    entries: Vec<(AddressRange, PortRange)>,
}

impl EndpointPool {
    pub fn new(entries: Vec<(AddressRange, PortRange)>) -> Result<Self, ParseError> {
        if entries.is_empty() {
            return Err(ParseError::EmptyPool);
        }
        Ok(Self { entries })
    }

    /// Build a pool from `ip[/prefix]:port[-port]` entry specs.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, ParseError> {
        let entries = specs
            .iter()
            .map(|spec| parse_endpoint_spec(spec.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[(AddressRange, PortRange)] {
        &self.entries
    }

    pub fn contains(&self, endpoint: SocketAddrV4) -> bool {
        self.entries
            .iter()
            .any(|(ips, ports)| ips.contains(*endpoint.ip()) && ports.contains(endpoint.port()))
    }
}

/// Draws `(ip, port)` pairs uniformly from a pool.
///
/// One generator, seeded once and shared by every caller, so repeated
/// sampling statistically covers the full configured space. Access is
/// serialized by a mutex since listener tasks run on a multi-threaded
/// runtime.
pub struct EndpointSampler {
    rng: Mutex<StdRng>,
}

impl EndpointSampler {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sampler for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Pick a pool entry uniformly (when there is more than one), then an IP
    /// and a port uniformly and independently within that entry's ranges.
    pub fn sample(&self, pool: &EndpointPool) -> SocketAddrV4 {
        let mut rng = self.rng.lock().expect("sampler mutex poisoned");
        let entries = pool.entries();
        let (ips, ports) = if entries.len() > 1 {
            &entries[rng.gen_range(0..entries.len())]
        } else {
            &entries[0]
        };
        let ip = rng.gen_range(u32::from(ips.start())..=u32::from(ips.end()));
        let port = rng.gen_range(ports.start()..=ports.end());
        SocketAddrV4::new(Ipv4Addr::from(ip), port)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(spec: &str) -> EndpointPool {
        EndpointPool::from_specs(&[spec]).unwrap()
    }

    #[test]
    fn rejects_empty_pool() {
        let specs: [&str; 0] = [];
        assert_eq!(
            EndpointPool::from_specs(&specs).unwrap_err(),
            ParseError::EmptyPool
        );
    }

    #[test]
    fn samples_stay_in_bounds_and_cover_the_space() {
        // 4 IPs x 100 ports = 400 possible pairs.
        let pool = pool("10.0.0.0/30:7000-7099");
        let sampler = EndpointSampler::with_seed(42);

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let endpoint = sampler.sample(&pool);
            assert!(pool.contains(endpoint), "out of bounds: {endpoint}");
            seen.insert((u32::from(*endpoint.ip()), endpoint.port()));
        }
        assert!(
            seen.len() > 360,
            "only {} of 400 pairs covered in 10k draws",
            seen.len()
        );
    }

    #[test]
    fn single_value_ranges_yield_a_constant() {
        let pool = pool("192.0.2.1:9000");
        let sampler = EndpointSampler::with_seed(1);
        for _ in 0..100 {
            assert_eq!(
                sampler.sample(&pool),
                SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 9000)
            );
        }
    }

    #[test]
    fn multi_entry_pool_draws_from_every_entry() {
        let pool =
            EndpointPool::from_specs(&["10.0.0.1:1000", "10.0.0.2:2000", "10.0.0.3:3000"]).unwrap();
        let sampler = EndpointSampler::with_seed(3);

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let endpoint = sampler.sample(&pool);
            assert!(pool.contains(endpoint));
            seen.insert(endpoint);
        }
        assert_eq!(seen.len(), 3, "every entry should be drawn eventually");
    }

    #[test]
    fn deterministic_under_a_fixed_seed() {
        let pool = pool("10.0.0.0/24:4000-4999");
        let a = EndpointSampler::with_seed(99);
        let b = EndpointSampler::with_seed(99);
        for _ in 0..50 {
            assert_eq!(a.sample(&pool), b.sample(&pool));
        }
    }
}
