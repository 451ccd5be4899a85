// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use clap::{Parser, Subcommand};
use gmp_operator::context::Settings;
use gmp_operator::retry::RetryPolicy;
use gmp_operator::synthesis::Environment;
use gmp_operator::{Options, crd, run};
use shadow_rs::shadow;
use std::time::Duration;

shadow!(build);

const LONG_VERSION: &str = const_str::concat!(
    build::PKG_VERSION,
    " (",
    build::SHORT_COMMIT,
    " ",
    build::BUILD_TIME,
    ")"
);

#[derive(Parser)]
#[command(name = "gmp-operator")]
#[command(about = "Managed Prometheus Kubernetes Operator CLI", long_about = None)]
#[command(version = build::PKG_VERSION, long_version = LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Output CRDs in YAML
    Crd {
        /// Optional output path. If not set, the output will be written to stdout.
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Run the controllers
    Server(ServerArgs),
}

#[derive(clap::Args)]
struct ServerArgs {
    /// Namespace the operator and its generated resources live in.
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "gmp-system")]
    operator_namespace: String,

    /// Namespace holding the OperatorConfig and the secrets it references.
    #[arg(long, env = "PUBLIC_NAMESPACE", default_value = "gmp-public")]
    public_namespace: String,

    #[arg(long, env = "PROJECT_ID", default_value = "")]
    project_id: String,

    #[arg(long, env = "LOCATION", default_value = "")]
    location: String,

    #[arg(long, env = "CLUSTER_NAME", default_value = "")]
    cluster: String,

    /// Secret holding the webhook serving certificate.
    #[arg(long, env = "TLS_SECRET")]
    tls_secret: Option<String>,

    #[arg(long, env = "PROBE_PORT", default_value_t = 18081)]
    probe_port: u16,

    /// Seconds between unconditional synthesis cycles.
    #[arg(long, env = "RESYNC_INTERVAL", default_value_t = 300)]
    resync_interval: u64,

    /// Seconds a single cycle may take.
    #[arg(long, env = "CYCLE_TIMEOUT", default_value_t = 60)]
    cycle_timeout: u64,
}

impl From<ServerArgs> for Options {
    fn from(args: ServerArgs) -> Self {
        Options {
            env: Environment {
                operator_namespace: args.operator_namespace,
                public_namespace: args.public_namespace,
                project_id: args.project_id,
                location: args.location,
                cluster: args.cluster,
            },
            tls_secret: args.tls_secret.filter(|s| !s.is_empty()),
            probe_port: args.probe_port,
            settings: Settings {
                resync_interval: Duration::from_secs(args.resync_interval),
                cycle_timeout: Duration::from_secs(args.cycle_timeout),
                retry: RetryPolicy::default(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crd { file } => crd(file).await?,
        Commands::Server(args) => run(args.into()).await?,
    }

    Ok(())
}
