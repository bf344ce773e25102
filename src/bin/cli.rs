//! vectorbase-cli — a thin `clap` + `reqwest` client over the REST
//! front door (src/rest.rs), grounded on the teacher's `src/bin/cli.rs`
//! command/subcommand shape. Scoped to this spec's bucket/index/vector/
//! query surface; the teacher's register/login/tenant/user commands are
//! dropped since auth is out of scope (spec.md §1).

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::json;

#[derive(Parser)]
#[command(name = "vectorbase-cli")]
#[command(about = "CLI for vectorbase", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a bucket.
    CreateBucket {
        #[arg(short, long)]
        bucket: String,
    },
    /// Fetch bucket metadata.
    GetBucket {
        #[arg(short, long)]
        bucket: String,
    },
    /// Delete a bucket.
    DeleteBucket {
        #[arg(short, long)]
        bucket: String,
    },
    /// Create an index within a bucket.
    CreateIndex {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        dimension: u32,
        #[arg(short = 'm', long, default_value = "cosine")]
        distance_metric: String,
        #[arg(short, long, default_value = "graph")]
        algorithm: String,
    },
    /// Fetch index configuration.
    GetIndex {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
    },
    /// Delete an index.
    DeleteIndex {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
    },
    /// Stage and consolidate a batch of vectors from a JSON file.
    ///
    /// The file must contain a JSON array of `{key, vector, metadata}`
    /// objects matching `crate::models::VectorRow`.
    PutVectors {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        file: String,
    },
    /// Fetch vectors by key.
    GetVectors {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// List vectors, optionally paginated with a cursor.
    ListVectors {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        cursor: Option<String>,
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
    /// Tombstone vectors by key.
    DeleteVectors {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// Run a nearest-neighbor query.
    Query {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        /// comma-separated query vector components
        #[arg(short = 'v', long, value_delimiter = ',')]
        vector: Vec<f32>,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        /// filter expression as raw JSON (crate::filter::FilterExpr)
        #[arg(short = 'f', long)]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::CreateBucket { bucket } => {
            let res = client.put(format!("{}/buckets/{}", cli.url, bucket)).send().await?;
            println!("{}", res.text().await?);
        }
        Commands::GetBucket { bucket } => {
            let res = client.get(format!("{}/buckets/{}", cli.url, bucket)).send().await?;
            println!("{}", res.text().await?);
        }
        Commands::DeleteBucket { bucket } => {
            let res = client.delete(format!("{}/buckets/{}", cli.url, bucket)).send().await?;
            println!("status: {}", res.status());
        }
        Commands::CreateIndex { bucket, index, dimension, distance_metric, algorithm } => {
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}", cli.url, bucket, index))
                .json(&json!({
                    "dimension": dimension,
                    "distanceMetric": distance_metric,
                    "algorithm": algorithm,
                }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
        Commands::GetIndex { bucket, index } => {
            let res = client.get(format!("{}/buckets/{}/indexes/{}", cli.url, bucket, index)).send().await?;
            println!("{}", res.text().await?);
        }
        Commands::DeleteIndex { bucket, index } => {
            let res = client.delete(format!("{}/buckets/{}/indexes/{}", cli.url, bucket, index)).send().await?;
            println!("status: {}", res.status());
        }
        Commands::PutVectors { bucket, index, file } => {
            let raw = std::fs::read_to_string(&file)?;
            let vectors: serde_json::Value = serde_json::from_str(&raw)?;
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}/vectors", cli.url, bucket, index))
                .json(&json!({ "vectors": vectors }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
        Commands::GetVectors { bucket, index, keys } => {
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}/vectors:get", cli.url, bucket, index))
                .json(&json!({ "keys": keys }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
        Commands::ListVectors { bucket, index, cursor, limit } => {
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}/vectors:list", cli.url, bucket, index))
                .json(&json!({ "cursor": cursor, "limit": limit }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
        Commands::DeleteVectors { bucket, index, keys } => {
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}/vectors:delete", cli.url, bucket, index))
                .json(&json!({ "keys": keys }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
        Commands::Query { bucket, index, vector, top_k, filter } => {
            let filter: Option<serde_json::Value> = match filter {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            };
            let res = client
                .post(format!("{}/buckets/{}/indexes/{}/query", cli.url, bucket, index))
                .json(&json!({
                    "queryVector": vector,
                    "topK": top_k,
                    "filter": filter,
                }))
                .send()
                .await?;
            println!("{}", res.text().await?);
        }
    }

    Ok(())
}
