use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;

use medvit::{
    parse_device, run_domain, BaseModel, BatchSummary, ClassifierError, DomainConfig,
    ModelManager,
};

/// One row of the domain table: everything that differs between the five
/// diagnostic domains.
struct Domain {
    title: &'static str,
    adapter_dir: &'static str,
    images_dir: &'static str,
}

const DOMAINS: [Domain; 5] = [
    Domain {
        title: "Brain Tumor Classification",
        adapter_dir: "brain_tumor_loha",
        images_dir: "brain",
    },
    Domain {
        title: "Diabetic Retinopathy Classification",
        adapter_dir: "diabetic_loha",
        images_dir: "diabetic",
    },
    Domain {
        title: "Kidney Disease Classification",
        adapter_dir: "kidney_lora",
        images_dir: "kidney",
    },
    Domain {
        title: "Retina OCT Classification",
        adapter_dir: "retina_loha",
        images_dir: "retina",
    },
    Domain {
        title: "Skin Cancer Classification",
        adapter_dir: "skin_cancer_loha",
        images_dir: "skin_cancer",
    },
];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one adapter subdirectory per domain
    #[arg(long, default_value = "./adapters")]
    adapters_root: PathBuf,

    /// Directory holding one image subdirectory per domain
    #[arg(long, default_value = "./images")]
    images_root: PathBuf,

    /// Execution device: cpu, cuda, or cuda:N
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Force a fresh download of the base model files
    #[arg(short, long)]
    fresh: bool,

    /// Run a single domain (1-5) instead of the interactive menu
    #[arg(long)]
    domain: Option<usize>,
}

impl Args {
    fn domain_config(&self, domain: &Domain) -> DomainConfig {
        let adapter_dir = self.adapters_root.join(domain.adapter_dir);
        DomainConfig {
            name: domain.title.to_string(),
            base_model: BaseModel::VitBase224In21k,
            mappings_path: adapter_dir.join("mappings.json"),
            adapter_dir,
            images_root: self.images_root.join(domain.images_dir),
        }
    }
}

async fn ensure_model_downloaded(fresh: bool) -> anyhow::Result<()> {
    let manager = ModelManager::new_default().context("failed to open model cache")?;
    let model = BaseModel::VitBase224In21k;

    if fresh {
        info!("Fresh download requested - removing any existing model files...");
        manager.remove_download(model)?;
    }
    manager.ensure_model_downloaded(model).await?;
    Ok(())
}

/// Runs one domain end to end. Fatal errors (bad mapping artifact, missing
/// or incompatible adapter) are printed here so the caller can return to the
/// menu instead of crashing.
fn run_one(args: &Args, domain: &Domain) {
    let config = args.domain_config(domain);
    println!(
        "Starting {} for {}",
        domain.title,
        config.images_root.display()
    );

    let device = match parse_device(&args.device) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Cannot run {}: {}", domain.title, e);
            return;
        }
    };

    match run_domain(&config, device) {
        Ok(BatchSummary {
            total,
            succeeded,
            failed,
        }) => {
            println!(
                "\n{} finished: {} images, {} classified, {} failed",
                domain.title, total, succeeded, failed
            );
        }
        Err(e @ ClassifierError::Configuration(_)) | Err(e @ ClassifierError::ModelLoad(_)) => {
            eprintln!("Cannot run {}: {}", domain.title, e);
        }
        Err(e) => {
            // Per-image errors are handled inside the batch; anything that
            // escapes to here is unexpected but still must not crash the menu.
            eprintln!("{} aborted: {}", domain.title, e);
        }
    }
}

fn read_choice() -> Option<String> {
    print!("\nEnter your choice (1-6): ");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    if line.is_empty() {
        return None; // EOF
    }
    Some(line.trim().to_string())
}

fn menu_loop(args: &Args) {
    loop {
        println!("\nWelcome to the Image Classification Tool!");
        println!("Please choose one of the following options:\n");
        for (i, domain) in DOMAINS.iter().enumerate() {
            println!("{}. {}", i + 1, domain.title);
        }
        println!("{}. Exit", DOMAINS.len() + 1);

        let Some(choice) = read_choice() else {
            break;
        };
        match choice.parse::<usize>() {
            Ok(n) if (1..=DOMAINS.len()).contains(&n) => run_one(args, &DOMAINS[n - 1]),
            Ok(n) if n == DOMAINS.len() + 1 => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice, please enter a valid number between 1-6."),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    ensure_model_downloaded(args.fresh)
        .await
        .context("failed to prepare the base model")?;

    if let Some(n) = args.domain {
        let domain = DOMAINS
            .get(n.wrapping_sub(1))
            .with_context(|| format!("--domain must be between 1 and {}", DOMAINS.len()))?;
        run_one(&args, domain);
        return Ok(());
    }

    menu_loop(&args);
    Ok(())
}
