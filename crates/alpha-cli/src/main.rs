use anyhow::{bail, Result};

use alpha_core::{config::RunConfig, logging, BestAlpha};
use alpha_search::{PineExporter, Vocab};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }
    match args[1].as_str() {
        "mine" => cmd_mine(&args[2..]),
        "mine-all" => cmd_mine_all(&args[2..]),
        "export" => cmd_export(&args[2..]),
        "features" => cmd_features(&args[2..]),
        "vocab" => cmd_vocab(&args[2..]),
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn cmd_mine(args: &[String]) -> Result<()> {
    let verbose = has_flag(args, "--verbose");
    let _guard = logging::setup_logging(verbose)?;

    let config = build_config(args)?;
    let best = alpha_search::run_one(&config)?;
    println!(
        "Best alpha for {}: score {:.4}",
        best.ticker, best.score
    );
    if let Some(formula) = &best.formula {
        println!("  formula: {}", Vocab::standard().describe(formula));
        println!("  tokens:  {:?}", formula);
    } else {
        println!("  no usable formula found");
    }
    Ok(())
}

fn cmd_mine_all(args: &[String]) -> Result<()> {
    let verbose = has_flag(args, "--verbose");
    let _guard = logging::setup_logging(verbose)?;

    let tickers_raw = parse_flag(args, "--tickers")
        .unwrap_or_else(|| "PLTR,TGT,AAPL,MSFT,NVDA".to_string());
    let tickers: Vec<String> = tickers_raw
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().to_string())
        .collect();
    if tickers.is_empty() {
        bail!("--tickers produced an empty universe");
    }

    let base = build_config(args)?;
    let mined = alpha_search::mine_all(&base, &tickers)?;
    println!("Mined {} of {} tickers this session", mined.len(), tickers.len());
    for best in &mined {
        println!("  {}: {:.4}", best.ticker, best.score);
    }
    Ok(())
}

fn cmd_export(args: &[String]) -> Result<()> {
    logging::setup_minimal_logging(has_flag(args, "--verbose"))?;

    let ticker = parse_flag(args, "--ticker").unwrap_or_else(|| "PLTR".to_string());
    let results_dir = parse_flag(args, "--results").unwrap_or_else(|| "results".to_string());

    let best = BestAlpha::load(&results_dir, &ticker)?;
    let Some(formula) = &best.formula else {
        bail!("artifact for {} holds no formula", ticker);
    };

    let vocab = Vocab::standard();
    let script = PineExporter::new(&vocab).strategy(&ticker, formula);
    match parse_flag(args, "--out") {
        Some(path) => {
            std::fs::write(&path, &script)?;
            println!("Wrote Pine strategy for {} to {}", ticker, path);
        }
        None => println!("{}", script),
    }
    Ok(())
}

fn cmd_features(args: &[String]) -> Result<()> {
    logging::setup_minimal_logging(has_flag(args, "--verbose"))?;

    let root = parse_flag(args, "--root").unwrap_or_else(|| "data".to_string());
    let ticker = parse_flag(args, "--ticker").unwrap_or_else(|| "PLTR".to_string());
    let data = alpha_data::load_market_data(&root, &ticker)?;
    println!(
        "Features {} -> channels={}, steps={}",
        ticker,
        data.features.n_channels(),
        data.features.len()
    );
    for (idx, name) in data.features.names.iter().enumerate() {
        let channel = data.features.channel(idx);
        let mean = channel.sum() / channel.len() as f32;
        println!("  {:8} mean={:+.6}", name, mean);
    }
    Ok(())
}

fn cmd_vocab(_args: &[String]) -> Result<()> {
    let vocab = Vocab::standard();
    println!("Vocabulary ({} tokens):", vocab.len());
    for idx in 0..vocab.len() {
        if let Some(name) = vocab.name(idx) {
            println!("  {:2}  {}", idx, name);
        }
    }
    Ok(())
}

fn build_config(args: &[String]) -> Result<RunConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => RunConfig::from_file(&path)?,
        None => RunConfig::default(),
    };

    if let Some(ticker) = parse_flag(args, "--ticker") {
        config.ticker = ticker;
    }
    if let Some(root) = parse_flag(args, "--root") {
        config.data_root = root.into();
    }
    if let Some(results) = parse_flag(args, "--results") {
        config.results_dir = results.into();
    }
    if let Some(steps) = parse_flag(args, "--steps") {
        config.train_steps = steps.parse()?;
    }
    if let Some(batch) = parse_flag(args, "--batch") {
        config.batch_size = batch.parse()?;
    }
    if let Some(len) = parse_flag(args, "--max-len") {
        config.max_formula_len = len.parse()?;
    }
    if let Some(rate) = parse_flag(args, "--lord-decay") {
        config.lord_decay_rate = rate.parse()?;
    }
    if let Some(iters) = parse_flag(args, "--lord-iters") {
        config.lord_num_iterations = iters.parse()?;
    }
    if let Some(seed) = parse_flag(args, "--seed") {
        config.seed = Some(seed.parse()?);
    }
    if has_flag(args, "--no-lord") {
        config.use_lord = false;
    }

    config.validate()?;
    Ok(config)
}

fn parse_flag(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == name {
            return iter.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

fn print_help() {
    println!("alpha-cli");
    println!("  mine --ticker PLTR --root data --results results --steps 1000 --batch 256 --max-len 12 [--no-lord] [--seed N] [--config path.json] [--verbose]");
    println!("  mine-all --tickers PLTR,TGT,AAPL --root data --results results [--steps N] [--verbose]");
    println!("  export --ticker PLTR --results results [--out strategy.pine]");
    println!("  features --ticker PLTR --root data");
    println!("  vocab");
}
