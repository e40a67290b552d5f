//! # Fukusu CLI
//!
//! 運用者向けのコマンドラインツール。
//!
//! ## サブコマンド
//! - `genkey`: Structured形式のAPIトークンを生成
//! - `presign`: アップロード用の署名付きURLを生成（Gatewayと同じ構築ルーチン）
//! - `verify-url`: 署名付きURLを検証

use clap::{Parser, Subcommand};
use fukusu_core::{build_signed_url, encode_token, now_millis, verify_signed_url};
use fukusu_types::TokenClaims;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "fukusu-cli", version, about = "Fukusu ingest gateway operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// APIトークンを生成する
    Genkey {
        /// 共有シークレット（UPLOADTHING_SECRET）
        #[arg(long, env = "UPLOADTHING_SECRET")]
        secret: String,
        #[arg(long, default_value = "fkapp")]
        app_id: String,
        #[arg(long, default_value = "fukusu-server")]
        region: String,
    },
    /// アップロード用の署名付きURLを生成する
    Presign(PresignArgs),
    /// 署名付きURLを検証する
    VerifyUrl {
        #[arg(long, env = "UPLOADTHING_SECRET")]
        secret: String,
        url: String,
    },
}

#[derive(clap::Args, Debug)]
struct PresignArgs {
    #[arg(long, env = "UPLOADTHING_SECRET")]
    secret: String,
    /// GatewayのベースURL（API_BASE_URL）
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:8787")]
    base_url: String,
    /// ファイルキー
    #[arg(long)]
    key: String,
    #[arg(long)]
    file_name: Option<String>,
    #[arg(long)]
    file_size: Option<u64>,
    #[arg(long)]
    file_type: Option<String>,
    /// appUrl・ufsUrlに使う識別子
    #[arg(long)]
    identifier: Option<String>,
    #[arg(long)]
    custom_id: Option<String>,
    #[arg(long)]
    acl: Option<String>,
    #[arg(long)]
    content_disposition: Option<String>,
    /// 有効期間（秒）
    #[arg(long, default_value_t = 3600)]
    expires_in: u64,
}

fn genkey(secret: String, app_id: String, region: String) -> String {
    encode_token(&TokenClaims {
        app_id,
        api_key: secret,
        regions: region,
    })
}

fn presign(args: &PresignArgs, now_ms: u64) -> anyhow::Result<String> {
    let file_size = args.file_size.map(|s| s.to_string());
    let optional = [
        ("x-ut-identifier", args.identifier.as_deref()),
        ("x-ut-file-name", args.file_name.as_deref()),
        ("x-ut-file-size", file_size.as_deref()),
        ("x-ut-file-type", args.file_type.as_deref()),
        ("x-ut-acl", args.acl.as_deref()),
        ("x-ut-content-disposition", args.content_disposition.as_deref()),
        ("x-ut-custom-id", args.custom_id.as_deref()),
    ];
    let params: Vec<(&str, &str)> = optional
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect();

    Ok(build_signed_url(
        &args.base_url,
        &args.key,
        &params,
        args.expires_in,
        args.secret.as_bytes(),
        now_ms,
    )?)
}

fn verify_url(secret: &str, raw: &str, now_ms: u64) -> anyhow::Result<()> {
    let url = Url::parse(raw)?;
    verify_signed_url(&url, secret.as_bytes(), now_ms)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Genkey {
            secret,
            app_id,
            region,
        } => println!("{}", genkey(secret, app_id, region)),
        Command::Presign(args) => println!("{}", presign(&args, now_millis())?),
        Command::VerifyUrl { secret, url } => {
            verify_url(&secret, &url, now_millis())?;
            println!("OK");
        }
    }
    Ok(())
}
