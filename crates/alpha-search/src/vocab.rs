// Token vocabulary: feature tokens first, then operators. Token identity
// is the index into this ordered list; the list is immutable for a run.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Abs,
    Sign,
    Gate,
    Jump,
    Decay,
    Delay1,
    Max3,
}

impl Op {
    pub const ALL: [Op; 12] = [
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Neg,
        Op::Abs,
        Op::Sign,
        Op::Gate,
        Op::Jump,
        Op::Decay,
        Op::Delay1,
        Op::Max3,
    ];

    pub fn arity(self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div => 2,
            Op::Gate => 3,
            Op::Neg | Op::Abs | Op::Sign | Op::Jump | Op::Decay | Op::Delay1 | Op::Max3 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Neg => "NEG",
            Op::Abs => "ABS",
            Op::Sign => "SIGN",
            Op::Gate => "GATE",
            Op::Jump => "JUMP",
            Op::Decay => "DECAY",
            Op::Delay1 => "DELAY1",
            Op::Max3 => "MAX3",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved token: either a feature channel reference or an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Index into the feature tensor's channels.
    Feature(usize),
    Op(Op),
}

#[derive(Debug, Clone)]
pub struct Vocab {
    features: Vec<String>,
    ops: Vec<Op>,
}

impl Vocab {
    /// The fixed production vocabulary: five market feature channels plus
    /// the full operator set.
    pub fn standard() -> Self {
        Self::new(
            ["RET", "VOL", "V_CHG", "PV", "TREND"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Op::ALL.to_vec(),
        )
    }

    pub fn new(features: Vec<String>, ops: Vec<Op>) -> Self {
        Self { features, ops }
    }

    pub fn len(&self) -> usize {
        self.features.len() + self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Out-of-range indices resolve to `None`; callers treat them as no-ops.
    pub fn lookup(&self, idx: usize) -> Option<Token> {
        if idx < self.features.len() {
            Some(Token::Feature(idx))
        } else {
            self.ops
                .get(idx - self.features.len())
                .map(|op| Token::Op(*op))
        }
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        match self.lookup(idx)? {
            Token::Feature(f) => Some(self.features[f].as_str()),
            Token::Op(op) => Some(op.name()),
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        if let Some(pos) = self.features.iter().position(|f| f == name) {
            return Some(pos);
        }
        self.ops
            .iter()
            .position(|op| op.name() == name)
            .map(|pos| pos + self.features.len())
    }

    /// Render a formula as readable token names, skipping out-of-range
    /// indices the same way the interpreter does.
    pub fn describe(&self, formula: &[usize]) -> String {
        formula
            .iter()
            .filter_map(|&idx| self.name(idx))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
