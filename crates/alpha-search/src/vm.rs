// Stack-machine interpreter for RPN formulas over feature series.
//
// Execution is total: out-of-range token indices and operators without
// enough operands are skipped, never errors. Only an empty stack at the
// end of the scan yields Invalid (`None`).

use alpha_data::FeatureTensor;
use ndarray::Array1;

use crate::vocab::{Op, Token, Vocab};

const DIV_EPS: f32 = 1e-6;
const JUMP_WINDOW: usize = 20;

pub struct StackVm {
    vocab: Vocab,
}

impl StackVm {
    pub fn new(vocab: Vocab) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Execute one formula against the feature tensor. `None` means the
    /// formula never produced a value (empty stack).
    pub fn execute(&self, formula: &[usize], features: &FeatureTensor) -> Option<Array1<f32>> {
        let mut stack: Vec<Array1<f32>> = Vec::new();

        for &idx in formula {
            match self.vocab.lookup(idx) {
                Some(Token::Feature(channel)) => {
                    if channel < features.n_channels() {
                        stack.push(features.channel(channel).to_owned());
                    }
                }
                Some(Token::Op(op)) => {
                    let arity = op.arity();
                    if stack.len() < arity {
                        continue;
                    }
                    // The most recently pushed operand is the last argument.
                    let args = stack.split_off(stack.len() - arity);
                    stack.push(apply_op(op, &args));
                }
                None => {}
            }
        }

        stack.pop()
    }
}

fn apply_op(op: Op, args: &[Array1<f32>]) -> Array1<f32> {
    match op {
        Op::Add => &args[0] + &args[1],
        Op::Sub => &args[0] - &args[1],
        Op::Mul => &args[0] * &args[1],
        Op::Div => {
            let a = &args[0];
            let b = &args[1];
            Array1::from_shape_fn(a.len(), |t| a[t] / (b[t] + DIV_EPS))
        }
        Op::Neg => args[0].mapv(|v| -v),
        Op::Abs => args[0].mapv(f32::abs),
        Op::Sign => args[0].mapv(|v| {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        Op::Gate => {
            let (cond, then, other) = (&args[0], &args[1], &args[2]);
            Array1::from_shape_fn(cond.len(), |t| if cond[t] > 0.0 { then[t] } else { other[t] })
        }
        Op::Jump => rolling_zscore(&args[0], JUMP_WINDOW),
        Op::Decay => lagged_sum(&args[0], &[1.0, 0.8, 0.6]),
        Op::Delay1 => shift_one(&args[0]),
        Op::Max3 => lagged_max(&args[0], 3),
    }
}

fn lag(series: &Array1<f32>, t: usize, k: usize) -> f32 {
    // Values before the start of the series are defined as 0.
    if t >= k {
        series[t - k]
    } else {
        0.0
    }
}

fn shift_one(series: &Array1<f32>) -> Array1<f32> {
    Array1::from_shape_fn(series.len(), |t| lag(series, t, 1))
}

fn lagged_sum(series: &Array1<f32>, weights: &[f32]) -> Array1<f32> {
    Array1::from_shape_fn(series.len(), |t| {
        weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * lag(series, t, k))
            .sum()
    })
}

fn lagged_max(series: &Array1<f32>, depth: usize) -> Array1<f32> {
    Array1::from_shape_fn(series.len(), |t| {
        (0..depth)
            .map(|k| lag(series, t, k))
            .fold(f32::NEG_INFINITY, f32::max)
    })
}

/// Deviation of each value from its trailing mean, in trailing standard
/// deviations; 0 wherever the trailing std is 0. Partial windows near the
/// start use however many values exist.
fn rolling_zscore(series: &Array1<f32>, window: usize) -> Array1<f32> {
    let n = series.len();
    let mut out = Array1::<f32>::zeros(n);
    for t in 0..n {
        let start = t.saturating_sub(window - 1);
        let count = (t - start + 1) as f32;
        let mut mean = 0.0_f32;
        for j in start..=t {
            mean += series[j];
        }
        mean /= count;
        let mut var = 0.0_f32;
        for j in start..=t {
            let d = series[j] - mean;
            var += d * d;
        }
        let std = (var / count).sqrt();
        out[t] = if std > 0.0 { (series[t] - mean) / std } else { 0.0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn tensor(channels: &[(&str, Vec<f32>)]) -> FeatureTensor {
        let n = channels[0].1.len();
        let mut data = Array2::<f32>::zeros((channels.len(), n));
        for (row, (_, vals)) in channels.iter().enumerate() {
            for (t, v) in vals.iter().enumerate() {
                data[(row, t)] = *v;
            }
        }
        FeatureTensor {
            names: channels.iter().map(|(name, _)| name.to_string()).collect(),
            data,
        }
    }

    fn standard_vm() -> StackVm {
        StackVm::new(Vocab::standard())
    }

    fn op_idx(vm: &StackVm, name: &str) -> usize {
        vm.vocab().index_of(name).unwrap()
    }

    fn five_channel_tensor() -> FeatureTensor {
        tensor(&[
            ("ret", vec![1.0, -2.0, 3.0, 0.0]),
            ("vol", vec![10.0, 20.0, 30.0, 40.0]),
            ("v_chg", vec![0.5, -0.5, 0.0, 1.0]),
            ("pv", vec![10.0, -40.0, 90.0, 0.0]),
            ("trend", vec![0.0, 0.1, -0.1, 0.2]),
        ])
    }

    #[test]
    fn single_feature_token_returns_channel_exactly() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        for channel in 0..5 {
            let out = vm.execute(&[channel], &features).unwrap();
            assert_eq!(out, features.channel(channel).to_owned());
        }
    }

    #[test]
    fn add_combines_two_channels_elementwise() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let formula = [0, 1, op_idx(&vm, "ADD")];
        let out = vm.execute(&formula, &features).unwrap();
        let expected: Vec<f32> = vec![11.0, 18.0, 33.0, 40.0];
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn sub_respects_operand_order() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        // ret vol SUB  ==  ret - vol
        let out = vm.execute(&[0, 1, op_idx(&vm, "SUB")], &features).unwrap();
        assert_eq!(out.to_vec(), vec![-9.0, -22.0, -27.0, -40.0]);
    }

    #[test]
    fn div_is_finite_for_zero_denominator() {
        let vocab = Vocab::new(vec!["A".to_string(), "ZERO".to_string()], vec![Op::Div]);
        let vm = StackVm::new(vocab);
        let features = tensor(&[
            ("a", vec![1.0, 2.0, 3.0]),
            ("zero", vec![0.0, 0.0, 0.0]),
        ]);
        let out = vm.execute(&[0, 1, 2], &features).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[0] - 1.0 / DIV_EPS).abs() / (1.0 / DIV_EPS) < 1e-4);
    }

    #[test]
    fn gate_selects_elementwise() {
        let features = tensor(&[
            ("cond", vec![1.0, -1.0, 0.0, 2.0]),
            ("then", vec![10.0, 10.0, 10.0, 10.0]),
            ("else", vec![-7.0, -7.0, -7.0, -7.0]),
        ]);
        let vocab = Vocab::new(
            vec!["C".to_string(), "T".to_string(), "E".to_string()],
            vec![Op::Gate],
        );
        let vm = StackVm::new(vocab);
        // cond then else GATE
        let out = vm.execute(&[0, 1, 2, 3], &features).unwrap();
        assert_eq!(out.to_vec(), vec![10.0, -7.0, -7.0, 10.0]);
    }

    #[test]
    fn leading_operator_is_skipped_and_yields_invalid() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        // ADD with an empty stack is a no-op; nothing ever lands on the
        // stack, so the result is Invalid.
        assert!(vm.execute(&[op_idx(&vm, "ADD")], &features).is_none());
    }

    #[test]
    fn out_of_vocabulary_tokens_are_noops() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let out = vm.execute(&[999, 0, 999], &features).unwrap();
        assert_eq!(out, features.channel(0).to_owned());
    }

    #[test]
    fn empty_formula_is_invalid() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        assert!(vm.execute(&[], &features).is_none());
    }

    #[test]
    fn delay1_shifts_and_zero_fills() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let out = vm.execute(&[0, op_idx(&vm, "DELAY1")], &features).unwrap();
        assert_eq!(out.to_vec(), vec![0.0, 1.0, -2.0, 3.0]);
    }

    #[test]
    fn decay_weights_recent_history() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let out = vm.execute(&[0, op_idx(&vm, "DECAY")], &features).unwrap();
        // t=2: 3 + 0.8*(-2) + 0.6*1 = 2.0
        assert!((out[2] - 2.0).abs() < 1e-6);
        // t=0: only the current value exists.
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn max3_takes_rolling_maximum() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let out = vm.execute(&[0, op_idx(&vm, "MAX3")], &features).unwrap();
        assert_eq!(out.to_vec(), vec![1.0, 1.0, 3.0, 3.0]);
    }

    #[test]
    fn jump_is_zero_on_constant_series() {
        let vm = standard_vm();
        let features = tensor(&[
            ("ret", vec![5.0; 30]),
            ("vol", vec![0.0; 30]),
            ("v_chg", vec![0.0; 30]),
            ("pv", vec![0.0; 30]),
            ("trend", vec![0.0; 30]),
        ]);
        let out = vm.execute(&[0, op_idx(&vm, "JUMP")], &features).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn sign_maps_to_unit_values() {
        let vm = standard_vm();
        let features = five_channel_tensor();
        let out = vm.execute(&[0, op_idx(&vm, "SIGN")], &features).unwrap();
        assert_eq!(out.to_vec(), vec![1.0, -1.0, 1.0, 0.0]);
    }

    #[test]
    fn reduced_vocab_end_to_end_add() {
        // feature vocabulary [RET, VOL], operator vocabulary [ADD]:
        // [0, 1, 2] must evaluate to RET + VOL.
        let vocab = Vocab::new(vec!["RET".to_string(), "VOL".to_string()], vec![Op::Add]);
        let vm = StackVm::new(vocab);
        let features = tensor(&[
            ("ret", vec![1.0, 2.0, 3.0]),
            ("vol", vec![10.0, 20.0, 30.0]),
        ]);
        let out = vm.execute(&[0, 1, 2], &features).unwrap();
        assert_eq!(out.to_vec(), vec![11.0, 22.0, 33.0]);

        // A lone ADD leaves the stack empty.
        assert!(vm.execute(&[2], &features).is_none());
    }
}
