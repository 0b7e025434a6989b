use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use topoband_config::{AppConfig, ConfigError};
use topoband_engine::driver::run_band_sequence;
use topoband_engine::merge::merge_directory;
use topoband_engine::params::{BandSequenceParams, MergeParams};
use topoband_engine::survey::{CsvPointSource, PointSource, drop_non_positive_altitude, rescale};
use topoband_io::{DocumentLoader, DxfFacade};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod inspect;

/// 由高程测点生成海拔带轮廓图纸，并按间隔合并。
#[derive(Debug, Parser)]
#[command(name = "topoband", version)]
struct Cli {
    /// 配置文件路径；缺省时读取 TOPOBAND_CONFIG 或 ./config/default.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 读取测点 CSV，为每个海拔带写出一张图纸
    Bands {
        #[arg(long, value_name = "CSV")]
        input: PathBuf,
        #[arg(long, value_name = "DIR")]
        output: PathBuf,
        /// 覆盖 hull.alpha
        #[arg(long)]
        alpha: Option<f64>,
        /// 覆盖 smoothing.factor
        #[arg(long)]
        smoothing: Option<f64>,
    },
    /// 按海拔间隔合并海拔带图纸
    Merge {
        #[arg(long, value_name = "DIR")]
        input: PathBuf,
        #[arg(long, value_name = "DIR")]
        output: PathBuf,
        /// 覆盖 merge.gap（米）
        #[arg(long)]
        gap: Option<u32>,
    },
    /// 打印图纸的图层与实体统计
    Inspect { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            match &err {
                ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                    error!(path = %path.display(), error = %err, "加载配置失败");
                }
                ConfigError::Context { .. } => error!(error = %err, "加载配置失败"),
            }
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging.level);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "执行失败");
            ExitCode::FAILURE
        }
    }
}

fn load_configuration(override_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

fn run(command: Command, config: &AppConfig) -> Result<()> {
    let facade = DxfFacade::new();
    match command {
        Command::Bands {
            input,
            output,
            alpha,
            smoothing,
        } => {
            let source = CsvPointSource::new(&input);
            let mut points = source.load().context("读取测点失败")?;
            if config.survey.drop_non_positive_altitude {
                points = drop_non_positive_altitude(points).0;
            }
            rescale(&mut points, config.survey.xy_range);

            let mut params = BandSequenceParams::from(config);
            if let Some(alpha) = alpha {
                params.hull.alpha = alpha;
            }
            if let Some(factor) = smoothing {
                params.smoothing.factor = factor;
            }
            info!(input = %input.display(), points = points.len(), "测点已加载");

            let report = run_band_sequence(&points, &params, &output, &facade)
                .with_context(|| format!("无法写入输出目录 {}", output.display()))?;
            for path in &report.written {
                println!("{}", path.display());
            }
            for skipped in &report.skipped {
                warn!(band = %skipped.label, reason = %skipped.reason, "未生成图纸");
            }
            Ok(())
        }
        Command::Merge { input, output, gap } => {
            let mut params = MergeParams::from(config);
            if let Some(gap) = gap {
                params.gap = gap;
            }
            let report = merge_directory(&input, &params, &output, &facade, &facade)
                .context("合并海拔带图纸失败")?;
            for path in &report.written {
                println!("{}", path.display());
            }
            for failed in &report.failed {
                warn!(composite = %failed.name, reason = %failed.error, "合并图纸未生成");
            }
            Ok(())
        }
        Command::Inspect { file } => {
            let doc = facade
                .load(&file)
                .with_context(|| format!("无法读取 {}", file.display()))?;
            print!("{}", inspect::summarize(&file, &doc));
            Ok(())
        }
    }
}
