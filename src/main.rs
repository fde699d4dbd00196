use std::env;
use std::path::Path;

use log::{error, info};
use serde_json::json;
use uuid::Uuid;

use recipe_ingest::{CanonicalIngredient, ImportError, RecipeImporter, SourceInput};

const USAGE: &str = "Usage:
  recipe-ingest [--catalog <file.json>] <url>...
  recipe-ingest [--catalog <file.json>] --csv <file.csv>
  recipe-ingest [--catalog <file.json>] --pdf <file.pdf>
  recipe-ingest [--catalog <file.json>] --pages <image>...";

struct Args {
    source: SourceInput,
    catalog: Vec<CanonicalIngredient>,
}

fn parse_args(args: Vec<String>) -> Result<Args, Box<dyn std::error::Error>> {
    let mut catalog = Vec::new();
    let mut csv = None;
    let mut pdf = None;
    let mut pages = Vec::new();
    let mut urls = Vec::new();
    let mut reading_pages = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--catalog" => {
                let path = args.next().ok_or("--catalog needs a file")?;
                catalog = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            }
            "--csv" => csv = Some(args.next().ok_or("--csv needs a file")?),
            "--pdf" => pdf = Some(args.next().ok_or("--pdf needs a file")?),
            "--pages" => reading_pages = true,
            "-h" | "--help" => return Err(USAGE.into()),
            _ if reading_pages => pages.push(arg),
            _ => urls.push(arg),
        }
    }

    let source = if let Some(path) = csv {
        SourceInput::Spreadsheet {
            filename: file_name(&path),
            bytes: std::fs::read(&path)?,
        }
    } else if let Some(path) = pdf {
        SourceInput::Pdf {
            filename: file_name(&path),
            bytes: std::fs::read(&path)?,
        }
    } else if !pages.is_empty() {
        SourceInput::ScannedPages {
            filename: file_name(&pages[0]),
            pages: pages
                .iter()
                .map(std::fs::read)
                .collect::<Result<Vec<_>, _>>()?,
        }
    } else if urls.len() == 1 {
        SourceInput::Url(urls.remove(0))
    } else if !urls.is_empty() {
        SourceInput::UrlList(urls.join("\n"))
    } else {
        return Err(USAGE.into());
    };
    Ok(Args { source, catalog })
}

fn file_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(env::args().skip(1).collect())?;
    let importer = RecipeImporter::builder().catalog(args.catalog).build()?;

    let job = importer
        .start_import(args.source, Uuid::new_v4(), None)
        .await
        .map_err(|e: ImportError| {
            error!("Import could not start: {}", e);
            e
        })?;
    info!("Job {} started with {} items", job.id, job.total_items);

    importer.wait_idle().await;

    let job = importer.get_job(job.id).await?;
    let items = importer.list_items(job.id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "job": job, "items": items }))?
    );
    Ok(())
}
