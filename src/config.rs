use crate::{
    models::{
        checksum::ChecksumMode,
        policy::{PolicyResolver, PolicyRules},
    },
    services::scheduler::DEFAULT_MAX_CONCURRENCY,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Static credentials, used only when both halves are configured.
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Centralized run configuration.
/// Combines environment variables and CLI arguments; immutable once built.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub endpoint: Option<String>,
    pub credentials: Option<StaticCredentials>,
    pub bucket: String,
    pub region: String,
    pub source: PathBuf,
    /// Key prefix, without leading or trailing `/`. Empty means bucket root.
    pub target: String,
    pub delete: bool,
    pub policies: PolicyResolver,
    pub redirects: BTreeMap<String, String>,
    pub cloudfront_distribution: Option<String>,
    pub dry_run: bool,
    pub path_style: bool,
    pub allow_empty_source: bool,
    pub checksum: ChecksumMode,
    pub max_concurrency: usize,
    pub timeout: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronize a local directory with an S3 bucket")]
pub struct Args {
    /// Custom S3 endpoint URL (overrides PLUGIN_ENDPOINT / S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Access key (overrides PLUGIN_ACCESS_KEY / S3_ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// Secret key (overrides PLUGIN_SECRET_KEY / S3_SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Target bucket (overrides PLUGIN_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides PLUGIN_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Local directory to upload (overrides PLUGIN_SOURCE)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Key prefix inside the bucket (overrides PLUGIN_TARGET)
    #[arg(long)]
    pub target: Option<String>,

    /// Delete remote objects with no local counterpart
    #[arg(long)]
    pub delete: bool,

    /// JSON object: glob pattern -> canned ACL
    #[arg(long)]
    pub acl: Option<String>,

    /// JSON object: file extension -> content type
    #[arg(long)]
    pub content_type: Option<String>,

    /// JSON object: file extension -> content encoding
    #[arg(long)]
    pub content_encoding: Option<String>,

    /// JSON object: glob pattern -> cache-control value
    #[arg(long)]
    pub cache_control: Option<String>,

    /// JSON object: glob pattern -> { metadata key -> value }
    #[arg(long)]
    pub metadata: Option<String>,

    /// JSON object: redirect path -> destination URL
    #[arg(long)]
    pub redirects: Option<String>,

    /// CloudFront distribution to invalidate after the sync
    #[arg(long)]
    pub cloudfront_distribution: Option<String>,

    /// Decide and log, but never write to the bucket or CDN
    #[arg(long)]
    pub dry_run: bool,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub path_style: bool,

    /// Succeed even when the source directory holds no files
    #[arg(long)]
    pub allow_empty_source: bool,

    /// Request checksum calculation: `supported` or `required`
    #[arg(long)]
    pub checksum_calculation: Option<String>,

    /// Maximum number of jobs running at once
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Abort the run after this many seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl SyncConfig {
    /// Parse environment variables + CLI args into a SyncConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        let cwd = env::current_dir().context("reading current directory")?;
        Self::resolve(args, |name| env::var(name).ok(), cwd)
    }

    /// Merge `args` with values from `lookup`; CLI values win.
    pub fn resolve(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
        cwd: PathBuf,
    ) -> Result<Self> {
        let env = EnvLookup(lookup);

        // --- Plain values ---
        let Some(bucket) = args.bucket.or_else(|| env.var(&["PLUGIN_BUCKET"])) else {
            bail!("no bucket configured (--bucket or PLUGIN_BUCKET)");
        };
        let endpoint = args
            .endpoint
            .or_else(|| env.var(&["PLUGIN_ENDPOINT", "S3_ENDPOINT"]))
            .filter(|v| !v.is_empty());
        let access_key = args
            .access_key
            .or_else(|| env.var(&["PLUGIN_ACCESS_KEY", "S3_ACCESS_KEY"]));
        let secret_key = args
            .secret_key
            .or_else(|| env.var(&["PLUGIN_SECRET_KEY", "S3_SECRET_KEY"]));
        let credentials = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key))
                if !access_key.is_empty() && !secret_key.is_empty() =>
            {
                Some(StaticCredentials {
                    access_key,
                    secret_key,
                })
            }
            _ => None,
        };
        let region = args
            .region
            .or_else(|| env.var(&["PLUGIN_REGION"]))
            .unwrap_or_else(|| "us-east-1".into());
        let source = args
            .source
            .or_else(|| env.var(&["PLUGIN_SOURCE"]).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let target = args
            .target
            .or_else(|| env.var(&["PLUGIN_TARGET"]))
            .unwrap_or_else(|| "/".into());
        let cloudfront_distribution = args
            .cloudfront_distribution
            .or_else(|| env.var(&["PLUGIN_CLOUDFRONT_DISTRIBUTION"]))
            .filter(|v| !v.is_empty());

        // --- Flags ---
        let delete = env.flag(args.delete, &["PLUGIN_DELETE"])?;
        let dry_run = env.flag(args.dry_run, &["DRY_RUN", "PLUGIN_DRY_RUN"])?;
        let path_style = env.flag(args.path_style, &["PLUGIN_PATH_STYLE"])?;
        let allow_empty_source =
            env.flag(args.allow_empty_source, &["PLUGIN_ALLOW_EMPTY_SOURCE"])?;

        // --- Parsed values ---
        let checksum = match args
            .checksum_calculation
            .or_else(|| env.var(&["PLUGIN_CHECKSUM_CALCULATION"]))
        {
            Some(value) => value.parse::<ChecksumMode>()?,
            None => ChecksumMode::default(),
        };
        let max_concurrency = env.number(
            args.max_concurrency,
            "PLUGIN_MAX_CONCURRENCY",
            DEFAULT_MAX_CONCURRENCY,
        )?;
        if max_concurrency == 0 {
            bail!("max concurrency must be at least 1");
        }
        let timeout = env.number(args.timeout, "PLUGIN_TIMEOUT", 0u64)?;

        // --- JSON tables ---
        let rules = PolicyRules {
            acl: json_table("acl", args.acl.or_else(|| env.var(&["PLUGIN_ACL"])))?,
            content_type: json_table(
                "content-type",
                args.content_type.or_else(|| env.var(&["PLUGIN_CONTENT_TYPE"])),
            )?,
            content_encoding: json_table(
                "content-encoding",
                args.content_encoding
                    .or_else(|| env.var(&["PLUGIN_CONTENT_ENCODING"])),
            )?,
            cache_control: json_table(
                "cache-control",
                args.cache_control.or_else(|| env.var(&["PLUGIN_CACHE_CONTROL"])),
            )?,
            metadata: json_table(
                "metadata",
                args.metadata.or_else(|| env.var(&["PLUGIN_METADATA"])),
            )?,
        };
        let redirects = json_table(
            "redirects",
            args.redirects.or_else(|| env.var(&["PLUGIN_REDIRECTS"])),
        )?;

        Ok(Self {
            endpoint,
            credentials,
            bucket,
            region,
            source: cwd.join(source),
            target: target.trim_matches('/').to_string(),
            delete,
            policies: PolicyResolver::new(rules)?,
            redirects,
            cloudfront_distribution,
            dry_run,
            path_style,
            allow_empty_source,
            checksum,
            max_concurrency,
            timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        })
    }
}

/// Environment fallback for values missing from the command line.
struct EnvLookup<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvLookup<F> {
    /// First variable of `names` that is set.
    fn var(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| (self.0)(name))
    }

    fn flag(&self, cli: bool, names: &[&str]) -> Result<bool> {
        if cli {
            return Ok(true);
        }
        match names
            .iter()
            .find_map(|name| (self.0)(name).map(|value| (*name, value)))
        {
            Some((name, value)) => {
                parse_bool(&value).with_context(|| format!("parsing {} value `{}`", name, value))
            }
            None => Ok(false),
        }
    }

    fn number<T>(&self, cli: Option<T>, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = cli {
            return Ok(value);
        }
        match (self.0)(name) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value)),
            None => Ok(default),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

/// Decode a JSON object option; absent or blank means empty.
fn json_table<T: DeserializeOwned + Default>(name: &str, raw: Option<String>) -> Result<T> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .with_context(|| format!("parsing {} JSON `{}`", name, raw)),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(args: &[&str], env: &[(&str, &str)]) -> Result<SyncConfig> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(std::iter::once("s3-sync").chain(args.iter().copied()))?;
        SyncConfig::resolve(args, |name| env.get(name).cloned(), PathBuf::from("/work"))
    }

    #[test]
    fn defaults_apply_with_only_a_bucket() {
        let cfg = resolve(&["--bucket", "site-bucket"], &[]).unwrap();
        assert_eq!(cfg.bucket, "site-bucket");
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.source, PathBuf::from("/work/."));
        assert_eq!(cfg.target, "");
        assert_eq!(cfg.checksum, ChecksumMode::Required);
        assert_eq!(cfg.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(cfg.timeout.is_none());
        assert!(cfg.credentials.is_none());
        assert!(!cfg.delete && !cfg.dry_run && !cfg.path_style);
    }

    #[test]
    fn missing_bucket_is_rejected() {
        let err = resolve(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("no bucket"));
    }

    #[test]
    fn cli_wins_over_environment() {
        let cfg = resolve(
            &["--region", "eu-west-1", "--target", "/cli/"],
            &[
                ("PLUGIN_BUCKET", "env-bucket"),
                ("PLUGIN_REGION", "us-west-2"),
                ("PLUGIN_TARGET", "env"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.bucket, "env-bucket");
        assert_eq!(cfg.region, "eu-west-1");
        assert_eq!(cfg.target, "cli");
    }

    #[test]
    fn endpoint_and_keys_fall_back_to_aliases() {
        let cfg = resolve(
            &["--bucket", "b"],
            &[
                ("S3_ENDPOINT", "http://minio:9000"),
                ("S3_ACCESS_KEY", "AKIA"),
                ("PLUGIN_SECRET_KEY", "shh"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.endpoint.as_deref(), Some("http://minio:9000"));
        let creds = cfg.credentials.unwrap();
        assert_eq!(creds.access_key, "AKIA");
        assert!(!format!("{:?}", creds).contains("shh"));
    }

    #[test]
    fn one_key_alone_uses_default_chain() {
        let cfg = resolve(&["--bucket", "b", "--access-key", "AKIA"], &[]).unwrap();
        assert!(cfg.credentials.is_none());
    }

    #[test]
    fn boolean_env_values() {
        let cfg = resolve(
            &["--bucket", "b"],
            &[
                ("PLUGIN_DELETE", "yes"),
                ("DRY_RUN", "TRUE"),
                ("PLUGIN_PATH_STYLE", "0"),
                ("PLUGIN_ALLOW_EMPTY_SOURCE", "1"),
            ],
        )
        .unwrap();
        assert!(cfg.delete);
        assert!(cfg.dry_run);
        assert!(!cfg.path_style);
        assert!(cfg.allow_empty_source);

        let err = resolve(&["--bucket", "b"], &[("PLUGIN_DELETE", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("PLUGIN_DELETE"));
    }

    #[test]
    fn invalid_checksum_mode_is_rejected() {
        let err = resolve(&["--bucket", "b", "--checksum-calculation", "always"], &[]).unwrap_err();
        assert_eq!(err.to_string(), "invalid checksum calculation mode: always");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(resolve(&["--bucket", "b", "--max-concurrency", "0"], &[]).is_err());
    }

    #[test]
    fn json_tables_feed_policies_and_redirects() {
        let cfg = resolve(
            &[
                "--bucket",
                "b",
                "--cache-control",
                r#"{"*.html": "no-cache"}"#,
                "--timeout",
                "30",
            ],
            &[
                ("PLUGIN_ACL", r#"{"public/**": "public-read"}"#),
                ("PLUGIN_REDIRECTS", r#"{"/old": "/new"}"#),
                ("PLUGIN_METADATA", r#"{"*": {"team": "web"}}"#),
            ],
        )
        .unwrap();

        let policy = cfg.policies.resolve("public/index.html");
        assert_eq!(policy.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(policy.acl.as_str(), "public-read");
        assert_eq!(policy.metadata.get("team").map(String::as_str), Some("web"));
        assert_eq!(cfg.redirects.get("/old").map(String::as_str), Some("/new"));
        assert_eq!(cfg.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn malformed_json_and_unknown_acl_are_rejected() {
        assert!(resolve(&["--bucket", "b", "--acl", "{not json"], &[]).is_err());
        let err = resolve(&["--bucket", "b", "--acl", r#"{"*": "world-writable"}"#], &[])
            .unwrap_err();
        assert!(err.to_string().contains("world-writable"));
    }
}
