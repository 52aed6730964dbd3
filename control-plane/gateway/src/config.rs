//! Command-line / environment configuration, mirroring the teacher's
//! `StructOpt`-derived `CliArgs` (`control-plane/agents/core/src/server.rs`):
//! one struct, `long`/`env` pairs, `default_value`s for everything that has a
//! sane default.

use structopt::StructOpt;

#[derive(Debug, StructOpt, Clone)]
#[structopt(name = "cluster-gateway")]
pub struct CliArgs {
    /// Name of the cluster pool this gateway draws from.
    #[structopt(long, env = "POOL_NAME")]
    pub pool_name: String,

    /// Prefix used for synthetic claim names created by the autoscaler.
    #[structopt(long, env = "CLAIM_PREFIX", default_value = "prelude")]
    pub claim_prefix: String,

    /// Minimum effective target claim count.
    #[structopt(long, env = "POOL_BASE", default_value = "4")]
    pub pool_base: u32,

    /// Maximum effective target claim count.
    #[structopt(long, env = "POOL_MAX", default_value = "10")]
    pub pool_max: u32,

    /// Increment applied to the target count on scale-up.
    #[structopt(long, env = "POOL_INCREMENT", default_value = "1")]
    pub pool_increment: u32,

    /// Available-claim threshold below which the autoscaler considers
    /// scaling up.
    #[structopt(long, env = "POOL_AVAILABLE_THRESHOLD", default_value = "1")]
    pub available_threshold: u32,

    /// Cooldown between successive scale-up steps.
    #[structopt(long, env = "POOL_SCALE_UP_COOLDOWN", default_value = "25m")]
    pub scale_up_cooldown: humantime::Duration,

    /// How long `available` must stay above threshold before scaling back
    /// down to `pool_base`.
    #[structopt(long, env = "POOL_SCALE_DOWN_HYSTERESIS", default_value = "10m")]
    pub scale_down_hysteresis: humantime::Duration,

    /// How often the autoscaler and authenticator loops tick when no watch
    /// event arrives.
    #[structopt(long, env = "RECONCILE_PERIOD", default_value = "30s")]
    pub reconcile_period: humantime::Duration,

    /// Lifetime granted to a claim once a user is assigned to it, as a
    /// `d`/`h`/`m` duration string.
    #[structopt(long, env = "CLAIM_LIFETIME", default_value = "2h")]
    pub claim_lifetime: String,

    /// Admin dashboard password. Empty disables the admin surface entirely
    /// (every admin request is then treated as authorized).
    #[structopt(long, env = "ADMIN_PASSWORD", default_value = "")]
    pub admin_password: String,

    /// reCAPTCHA secret key used to verify `recaptchaToken`. Empty disables
    /// human verification.
    #[structopt(long, env = "RECAPTCHA_SECRET", default_value = "")]
    pub recaptcha_secret: String,

    /// reCAPTCHA site key returned to the web form by `GET /api/config`.
    #[structopt(long, env = "RECAPTCHA_SITE_KEY", default_value = "")]
    pub recaptcha_site_key: String,

    /// Explicit path to a kubeconfig for the hub cluster. Falls back to
    /// `$HOME/.kube/config`, then in-cluster config, in that order.
    #[structopt(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Namespace the pool's claims and deployments live in.
    #[structopt(long, env = "POOL_NAMESPACE", default_value = "default")]
    pub pool_namespace: String,

    /// TCP address the HTTP surface listens on.
    #[structopt(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,
}

impl CliArgs {
    pub fn load() -> Self {
        CliArgs::from_args()
    }
}
