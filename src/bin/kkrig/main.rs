//! kkrig - 为 KK 导出的 PMX 模型生成头发/饰品物理

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use kk_rigging::{run, PmxModel, RigConfig, RigContext, RigMode};

#[derive(Parser, Debug)]
#[command(name = "kkrig", version)]
#[command(about = "为 KK 导出的 PMX 模型生成头发/饰品物理", long_about = None)]
struct Args {
    /// 输入 PMX
    input: PathBuf,

    /// 输出 PMX（默认 `<input>_rigged.pmx`）
    output: Option<PathBuf>,

    /// 只绑定头发
    #[arg(long)]
    hair_only: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn mode(&self) -> RigMode {
        if self.hair_only {
            RigMode::HairOnly
        } else {
            RigMode::Full
        }
    }

    fn output(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| default_output(&self.input))
    }
}

/// `foo.pmx` → `foo_rigged.pmx`
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    input.with_file_name(format!("{}_rigged.pmx", stem))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut model = match PmxModel::load(&args.input) {
        Ok(model) => model,
        Err(e) => {
            log::error!("加载失败 {}: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let config = if args.verbose {
        RigConfig::verbose()
    } else {
        RigConfig::default()
    };
    let mut ctx = RigContext::new(config);
    let mut out_log = Vec::new();
    if let Err(e) = run(&mut model, args.mode(), &mut ctx, &mut out_log) {
        log::error!("绑定失败: {}", e);
        return ExitCode::FAILURE;
    }
    for line in &out_log {
        println!("{}", line);
    }

    let output = args.output();
    if let Err(e) = model.save(&output) {
        log::error!("保存失败 {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    log::info!("已保存 {}", output.display());
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["kkrig", "model.pmx", "out.pmx", "--hair-only", "-v"]).unwrap();
        assert_eq!(args.input, PathBuf::from("model.pmx"));
        assert_eq!(args.output(), PathBuf::from("out.pmx"));
        assert_eq!(args.mode(), RigMode::HairOnly);
        assert!(args.verbose);
    }

    #[test]
    fn test_default_output() {
        let args = Args::try_parse_from(["kkrig", "dir/model.pmx"]).unwrap();
        assert_eq!(args.output(), PathBuf::from("dir/model_rigged.pmx"));
        assert_eq!(args.mode(), RigMode::Full);
        assert!(!args.verbose);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Args::try_parse_from(["kkrig"]).is_err());
        assert!(Args::try_parse_from(["kkrig", "a.pmx", "--unknown"]).is_err());
        assert!(Args::try_parse_from(["kkrig", "a.pmx", "b.pmx", "c.pmx"]).is_err());
    }
}
