use super::operator::{Operator, OperatorId, MAX_MODULATION_INDEX};
use crate::error::{Error, Result};
use crate::synth::prelude::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use OperatorId::{A, B, C, D};

// --- Static topologies ---

/// One operator's place in a routing.
///
/// `fm` lists earlier nodes whose output modulates this operator's frequency.
/// `sum` lists earlier nodes passed through additively: their frequency
/// deviation and their audio are added to this node's own.
#[derive(Debug)]
pub struct Node {
    pub op: OperatorId,
    pub fm: &'static [usize],
    pub sum: &'static [usize],
}

/// Nodes in evaluation order; every input index refers to an earlier node.
#[derive(Debug)]
pub struct Topology {
    pub nodes: &'static [Node],
    pub carriers: &'static [usize],
}

const fn node(op: OperatorId, fm: &'static [usize], sum: &'static [usize]) -> Node {
    Node { op, fm, sum }
}

const TOPOLOGIES: [Topology; Algorithm::COUNT as usize] = [
    // D(C(B(A)))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[1], &[]), node(D, &[2], &[])],
        carriers: &[3],
    },
    // D(C(B+A))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[], &[0]), node(C, &[1], &[]), node(D, &[2], &[])],
        carriers: &[3],
    },
    // D(C+B(A))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[], &[1]), node(D, &[2], &[])],
        carriers: &[3],
    },
    // D(B(A)+C(A))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[0], &[]), node(D, &[1, 2], &[])],
        carriers: &[3],
    },
    // D(B(A))+C(B(A))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[1], &[]), node(D, &[1], &[])],
        carriers: &[3, 2],
    },
    // D+C(B(A))
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[1], &[]), node(D, &[], &[2])],
        carriers: &[3],
    },
    // D(C+A+B)
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[], &[]), node(C, &[], &[0, 1]), node(D, &[2], &[])],
        carriers: &[3],
    },
    // C(A)+D(B)
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[], &[]), node(C, &[0], &[]), node(D, &[1], &[])],
        carriers: &[2, 3],
    },
    // B(A)+C(A)+D(A)
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[0], &[]), node(D, &[0], &[])],
        carriers: &[1, 2, 3],
    },
    // D+C+B(A)
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[], &[1]), node(D, &[], &[2])],
        carriers: &[3],
    },
    // D+C(A)+B(A)
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[0], &[]), node(C, &[0], &[]), node(D, &[], &[2, 1])],
        carriers: &[3],
    },
    // D+C+B+A
    Topology {
        nodes: &[node(A, &[], &[]), node(B, &[], &[0]), node(C, &[], &[1]), node(D, &[], &[2])],
        carriers: &[3],
    },
];

// --- Algorithm ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleDirection {
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Carrier,
    Modulator,
}

/// Index of one of the twelve fixed routings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Algorithm(u8);

impl Algorithm {
    pub const COUNT: u8 = 12;

    pub fn new(index: u8) -> Result<Self> {
        if index < Self::COUNT {
            Ok(Self(index))
        } else {
            Err(Error::InvalidAlgorithm(index))
        }
    }

    pub fn all() -> impl Iterator<Item = Algorithm> {
        (0..Self::COUNT).map(Algorithm)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn topology(self) -> &'static Topology {
        &TOPOLOGIES[self.0 as usize]
    }

    pub fn cycle(self, direction: CycleDirection) -> Self {
        match direction {
            CycleDirection::Forward => self.next(),
            CycleDirection::Backward => self.previous(),
        }
    }

    pub fn next(self) -> Self {
        Self((self.0 + 1) % Self::COUNT)
    }

    pub fn previous(self) -> Self {
        Self((self.0 + Self::COUNT - 1) % Self::COUNT)
    }

    /// Whether `op`'s audio reaches the output, directly or through a sum.
    pub fn role(self, op: OperatorId) -> Role {
        let topology = self.topology();
        let Some(index) = topology.nodes.iter().position(|n| n.op == op) else {
            return Role::Modulator;
        };
        if reaches_output(topology, index) {
            Role::Carrier
        } else {
            Role::Modulator
        }
    }
}

fn reaches_output(topology: &Topology, index: usize) -> bool {
    topology.carriers.contains(&index)
        || topology
            .nodes
            .iter()
            .enumerate()
            .any(|(i, n)| n.sum.contains(&index) && reaches_output(topology, i))
}

fn write_node(f: &mut fmt::Formatter<'_>, topology: &Topology, index: usize) -> fmt::Result {
    let node = &topology.nodes[index];
    write!(f, "{}", node.op)?;
    if !node.fm.is_empty() {
        f.write_str("(")?;
        for (i, &input) in node.fm.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write_node(f, topology, input)?;
        }
        f.write_str(")")?;
    }
    for &input in node.sum {
        f.write_str("+")?;
        write_node(f, topology, input)?;
    }
    Ok(())
}

/// Renders the routing, e.g. `D(C(B(A)))`.
impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topology = self.topology();
        for (i, &carrier) in topology.carriers.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write_node(f, topology, carrier)?;
        }
        Ok(())
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::new(index)
    }
}

// --- Publication ---

/// Shared handle to the active algorithm. Only validated indices are ever
/// stored, so a reader always sees one complete routing.
#[derive(Clone, Debug, Default)]
pub struct AlgorithmSlot {
    index: Arc<AtomicU8>,
}

impl AlgorithmSlot {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            index: Arc::new(AtomicU8::new(algorithm.0)),
        }
    }

    /// Validates and publishes; an invalid index leaves the slot unchanged.
    pub fn publish(&self, index: u8) -> Result<Algorithm> {
        let algorithm = Algorithm::new(index)?;
        self.store(algorithm);
        Ok(algorithm)
    }

    pub fn store(&self, algorithm: Algorithm) {
        self.index.store(algorithm.0, Ordering::Release);
    }

    #[inline]
    pub fn load(&self) -> Algorithm {
        Algorithm(self.index.load(Ordering::Acquire) % Algorithm::COUNT)
    }
}

// --- Router ---

/// Runs the operators through the active routing once per tick.
#[derive(Clone, Debug, Default)]
pub struct FmRouter {
    slot: AlgorithmSlot,
}

impl FmRouter {
    pub fn new(slot: AlgorithmSlot) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &AlgorithmSlot {
        &self.slot
    }

    pub fn algorithm(&self) -> Algorithm {
        self.slot.load()
    }

    /// Evaluates every node in order and returns the summed carrier audio.
    #[inline]
    pub fn tick(&mut self, operators: &mut [Operator; 4], mod_values: &[f64]) -> f64 {
        let topology = self.slot.load().topology();
        let mut deviation = [0.0; 4];
        let mut audio = [0.0; 4];

        for (i, node) in topology.nodes.iter().enumerate() {
            let op = &mut operators[node.op.index()];
            op.set_modulation(node.fm.iter().map(|&m| deviation[m]).sum());
            let out = op.tick(mod_values);

            deviation[i] = out * MAX_MODULATION_INDEX * op.frequency()
                + node.sum.iter().map(|&s| deviation[s]).sum::<f64>();
            audio[i] = out + node.sum.iter().map(|&s| audio[s]).sum::<f64>();
        }

        topology.carriers.iter().map(|&c| audio[c]).sum()
    }
}
