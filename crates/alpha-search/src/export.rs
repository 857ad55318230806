// Pine Script exporter: expands a token formula into a TradingView v5
// strategy by replaying the same stack discipline as the interpreter.
// Feature tokens push source expressions, operators pop and wrap them, so
// any formula the interpreter accepts expands to an equivalent script.

use crate::vocab::{Op, Token, Vocab};

pub struct PineExporter<'a> {
    vocab: &'a Vocab,
}

impl<'a> PineExporter<'a> {
    pub fn new(vocab: &'a Vocab) -> Self {
        Self { vocab }
    }

    /// Expand one formula into a Pine expression. `None` mirrors the
    /// interpreter's Invalid result: nothing ever landed on the stack.
    pub fn expression(&self, formula: &[usize]) -> Option<String> {
        let mut stack: Vec<String> = Vec::new();

        for &idx in formula {
            match self.vocab.lookup(idx) {
                Some(Token::Feature(channel)) => {
                    if let Some(expr) = feature_expr(self.vocab, channel) {
                        stack.push(expr);
                    }
                }
                Some(Token::Op(op)) => {
                    let arity = op.arity();
                    if stack.len() < arity {
                        continue;
                    }
                    let args = stack.split_off(stack.len() - arity);
                    stack.push(op_expr(op, &args));
                }
                None => {}
            }
        }

        stack.pop()
    }

    /// Full strategy script: the alpha expression traded against its own
    /// 20-bar moving average.
    pub fn strategy(&self, ticker: &str, formula: &[usize]) -> String {
        let header = format!(
            "//@version=5\nstrategy(\"Alpha Miner: {}\", overlay=false, initial_capital=10000)\n",
            ticker
        );

        let Some(alpha) = self.expression(formula) else {
            return format!("{}\n// Error: formula produced no signal\n", header);
        };

        format!(
            "{}\n\
             alpha = {}\n\
             alpha_ma = ta.sma(alpha, 20)\n\
             \n\
             long_entry = ta.crossover(alpha, alpha_ma)\n\
             long_exit = ta.crossunder(alpha, alpha_ma)\n\
             \n\
             if long_entry\n\
             \x20   strategy.entry(\"Long\", strategy.long)\n\
             if long_exit\n\
             \x20   strategy.close(\"Long\")\n\
             \n\
             plot(alpha, color=color.teal, title=\"Alpha\")\n\
             plot(alpha_ma, color=color.orange, title=\"Alpha MA\")\n\
             hline(0, \"Zero\", color=color.gray)\n",
            header, alpha
        )
    }
}

fn feature_expr(vocab: &Vocab, channel: usize) -> Option<String> {
    let name = vocab.name(channel)?;
    let expr = match name {
        "RET" => "(close / close[1] - 1)",
        "VOL" => "volume",
        "V_CHG" => "(volume / volume[1] - 1)",
        "PV" => "((close / close[1] - 1) * volume)",
        "TREND" => "(ta.sma(close, 20) / ta.sma(close, 60) - 1)",
        other => return Some(format!("/* {} */ close", other)),
    };
    Some(expr.to_string())
}

fn op_expr(op: Op, args: &[String]) -> String {
    match op {
        Op::Add => format!("({} + {})", args[0], args[1]),
        Op::Sub => format!("({} - {})", args[0], args[1]),
        Op::Mul => format!("({} * {})", args[0], args[1]),
        Op::Div => format!("({} / ({} + 1e-6))", args[0], args[1]),
        Op::Neg => format!("(-{})", args[0]),
        Op::Abs => format!("math.abs({})", args[0]),
        Op::Sign => format!("math.sign({})", args[0]),
        Op::Gate => format!("({} > 0 ? {} : {})", args[0], args[1], args[2]),
        Op::Jump => format!(
            "((({a}) - ta.sma(({a}), 20)) / (ta.stdev(({a}), 20) + 1e-9))",
            a = args[0]
        ),
        Op::Decay => format!(
            "(({a}) + 0.8 * ({a})[1] + 0.6 * ({a})[2])",
            a = args[0]
        ),
        Op::Delay1 => format!("({})[1]", args[0]),
        Op::Max3 => format!(
            "math.max(({a}), ({a})[1], ({a})[2])",
            a = args[0]
        ),
    }
}
