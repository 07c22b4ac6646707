//! Static CPU topology of a node.
//!
//! The socket → NUMA → CPU partition is discovered by the embedding agent
//! and handed in as-is. The constructor validates the partition invariants
//! (every CPU in exactly one NUMA node, every NUMA node on exactly one
//! socket); everything downstream can then treat lookups as total.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::cpuset::CpuSet;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors from topology construction and queries.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cpu {0} assigned to more than one NUMA node")]
    DuplicateCpu(usize),

    #[error("NUMA node {0} has no socket assignment")]
    MissingSocket(usize),

    #[error("unknown NUMA node: {0}")]
    UnknownNuma(usize),

    #[error("NUMA node id {0} out of mask range (max 63)")]
    NodeIdOutOfRange(usize),

    #[error("too many NUMA nodes for subset enumeration: {0}")]
    TooManyNodes(usize),

    #[error("NUMA nodes unevenly distributed: {numa_nodes} nodes across {sockets} sockets")]
    UnevenNumaDistribution { numa_nodes: usize, sockets: usize },

    #[error("cpus unevenly distributed: {cpus} cpus across {numa_nodes} NUMA nodes")]
    UnevenCpuDistribution { cpus: usize, numa_nodes: usize },

    #[error("cpu request {request} exceeds machine capacity {capacity}")]
    CapacityExceeded { request: u64, capacity: u64 },
}

/// Immutable description of the node's socket/NUMA/CPU layout.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// NUMA id → CPUs on that node.
    numa_cpus: BTreeMap<usize, CpuSet>,
    /// NUMA id → socket id.
    numa_socket: BTreeMap<usize, usize>,
    /// CPU id → NUMA id (inverse of `numa_cpus`).
    cpu_numa: HashMap<usize, usize>,
    num_cpus: usize,
    num_sockets: usize,
}

impl CpuTopology {
    /// Build and validate a topology from the NUMA partition and the
    /// NUMA → socket map.
    pub fn new(
        numa_cpus: BTreeMap<usize, CpuSet>,
        numa_socket: BTreeMap<usize, usize>,
    ) -> TopologyResult<Self> {
        let mut cpu_numa = HashMap::new();
        for (&numa, cpus) in &numa_cpus {
            if numa >= 64 {
                return Err(TopologyError::NodeIdOutOfRange(numa));
            }
            if !numa_socket.contains_key(&numa) {
                return Err(TopologyError::MissingSocket(numa));
            }
            for cpu in cpus.iter() {
                if cpu_numa.insert(cpu, numa).is_some() {
                    return Err(TopologyError::DuplicateCpu(cpu));
                }
            }
        }

        let num_cpus = cpu_numa.len();
        let mut sockets: Vec<usize> = numa_socket.values().copied().collect();
        sockets.sort_unstable();
        sockets.dedup();

        Ok(Self {
            numa_cpus,
            numa_socket,
            cpu_numa,
            num_cpus,
            num_sockets: sockets.len(),
        })
    }

    /// A synthetic topology with `sockets` sockets, `numas_per_socket` NUMA
    /// nodes each, and `cpus_per_numa` CPUs per node, ids assigned densely
    /// in order. Useful for embedders that virtualize topology and for
    /// tests.
    pub fn uniform(
        sockets: usize,
        numas_per_socket: usize,
        cpus_per_numa: usize,
    ) -> TopologyResult<Self> {
        let mut numa_cpus = BTreeMap::new();
        let mut numa_socket = BTreeMap::new();
        let mut next_cpu = 0;
        for socket in 0..sockets {
            for n in 0..numas_per_socket {
                let numa = socket * numas_per_socket + n;
                let cpus: CpuSet = (next_cpu..next_cpu + cpus_per_numa).collect();
                next_cpu += cpus_per_numa;
                numa_cpus.insert(numa, cpus);
                numa_socket.insert(numa, socket);
            }
        }
        Self::new(numa_cpus, numa_socket)
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn num_numa_nodes(&self) -> usize {
        self.numa_cpus.len()
    }

    pub fn num_sockets(&self) -> usize {
        self.num_sockets
    }

    /// NUMA ids in ascending order.
    pub fn numa_nodes(&self) -> Vec<usize> {
        self.numa_cpus.keys().copied().collect()
    }

    /// CPUs belonging to a NUMA node.
    pub fn cpus_in_numa(&self, numa: usize) -> TopologyResult<&CpuSet> {
        self.numa_cpus
            .get(&numa)
            .ok_or(TopologyError::UnknownNuma(numa))
    }

    /// The socket hosting a NUMA node.
    pub fn socket_of(&self, numa: usize) -> TopologyResult<usize> {
        self.numa_socket
            .get(&numa)
            .copied()
            .ok_or(TopologyError::UnknownNuma(numa))
    }

    /// The NUMA node owning a CPU, if known.
    pub fn numa_of_cpu(&self, cpu: usize) -> Option<usize> {
        self.cpu_numa.get(&cpu).copied()
    }

    /// NUMA nodes per socket. Fails when sockets carry unequal node counts.
    pub fn numas_per_socket(&self) -> TopologyResult<usize> {
        let mut per_socket: BTreeMap<usize, usize> = BTreeMap::new();
        for &socket in self.numa_socket.values() {
            *per_socket.entry(socket).or_insert(0) += 1;
        }
        let mut counts = per_socket.values().copied();
        let first = counts.next().unwrap_or(0);
        if counts.all(|c| c == first) && first > 0 {
            Ok(first)
        } else {
            Err(TopologyError::UnevenNumaDistribution {
                numa_nodes: self.num_numa_nodes(),
                sockets: self.num_sockets,
            })
        }
    }

    /// CPUs per NUMA node. Fails when nodes carry unequal CPU counts.
    pub fn cpus_per_numa(&self) -> TopologyResult<usize> {
        let mut counts = self.numa_cpus.values().map(CpuSet::size);
        let first = counts.next().unwrap_or(0);
        if counts.all(|c| c == first) && first > 0 {
            Ok(first)
        } else {
            Err(TopologyError::UnevenCpuDistribution {
                cpus: self.num_cpus,
                numa_nodes: self.num_numa_nodes(),
            })
        }
    }

    /// Minimum number of NUMA nodes needed to host `request` whole CPUs,
    /// never less than one. Fails when the request exceeds the machine.
    pub fn numa_count_to_fit(&self, request: u64) -> TopologyResult<usize> {
        if request > self.num_cpus as u64 {
            return Err(TopologyError::CapacityExceeded {
                request,
                capacity: self.num_cpus as u64,
            });
        }
        let per_numa = self.cpus_per_numa()? as u64;
        let needed = request.div_ceil(per_numa) as usize;
        Ok(needed.max(1))
    }

    /// Whether the given NUMA nodes span more than one socket.
    pub fn cross_sockets(&self, nodes: &[usize]) -> TopologyResult<bool> {
        let mut seen: Option<usize> = None;
        for &node in nodes {
            let socket = self.socket_of(node)?;
            match seen {
                None => seen = Some(socket),
                Some(s) if s != socket => return Ok(true),
                Some(_) => {}
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_builds_dense_layout() {
        let topo = CpuTopology::uniform(2, 2, 4).unwrap();
        assert_eq!(topo.num_cpus(), 16);
        assert_eq!(topo.num_numa_nodes(), 4);
        assert_eq!(topo.num_sockets(), 2);
        assert_eq!(topo.numa_nodes(), vec![0, 1, 2, 3]);
        assert_eq!(topo.cpus_in_numa(2).unwrap().to_vec(), vec![8, 9, 10, 11]);
        assert_eq!(topo.socket_of(3).unwrap(), 1);
        assert_eq!(topo.numa_of_cpu(5), Some(1));
    }

    #[test]
    fn rejects_cpu_in_two_numas() {
        let mut numa_cpus = BTreeMap::new();
        numa_cpus.insert(0, [0, 1].into_iter().collect());
        numa_cpus.insert(1, [1, 2].into_iter().collect());
        let numa_socket = BTreeMap::from([(0, 0), (1, 0)]);

        assert!(matches!(
            CpuTopology::new(numa_cpus, numa_socket),
            Err(TopologyError::DuplicateCpu(1))
        ));
    }

    #[test]
    fn rejects_numa_without_socket() {
        let mut numa_cpus = BTreeMap::new();
        numa_cpus.insert(0, [0, 1].into_iter().collect::<CpuSet>());
        let numa_socket = BTreeMap::new();

        assert!(matches!(
            CpuTopology::new(numa_cpus, numa_socket),
            Err(TopologyError::MissingSocket(0))
        ));
    }

    #[test]
    fn numas_per_socket_even_and_uneven() {
        let topo = CpuTopology::uniform(2, 2, 2).unwrap();
        assert_eq!(topo.numas_per_socket().unwrap(), 2);

        // Three nodes on socket 0, one on socket 1.
        let mut numa_cpus = BTreeMap::new();
        for n in 0..4usize {
            numa_cpus.insert(n, [n].into_iter().collect::<CpuSet>());
        }
        let numa_socket = BTreeMap::from([(0, 0), (1, 0), (2, 0), (3, 1)]);
        let topo = CpuTopology::new(numa_cpus, numa_socket).unwrap();
        assert!(matches!(
            topo.numas_per_socket(),
            Err(TopologyError::UnevenNumaDistribution { .. })
        ));
    }

    #[test]
    fn numa_count_to_fit_is_ceiling_with_floor_of_one() {
        let topo = CpuTopology::uniform(1, 2, 32).unwrap();
        assert_eq!(topo.numa_count_to_fit(0).unwrap(), 1);
        assert_eq!(topo.numa_count_to_fit(16).unwrap(), 1);
        assert_eq!(topo.numa_count_to_fit(32).unwrap(), 1);
        assert_eq!(topo.numa_count_to_fit(33).unwrap(), 2);
        assert_eq!(topo.numa_count_to_fit(64).unwrap(), 2);
        assert!(matches!(
            topo.numa_count_to_fit(65),
            Err(TopologyError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn cross_sockets_detection() {
        let topo = CpuTopology::uniform(2, 2, 2).unwrap();
        assert!(!topo.cross_sockets(&[0, 1]).unwrap());
        assert!(topo.cross_sockets(&[1, 2]).unwrap());
        assert!(!topo.cross_sockets(&[3]).unwrap());
        assert!(!topo.cross_sockets(&[]).unwrap());
        assert!(topo.cross_sockets(&[0, 9]).is_err());
    }
}
