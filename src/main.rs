use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use colored::Colorize;

use jake::{Jake, JakeOptions, Jakefile, RecipeKind};

#[derive(Parser)]
#[command(name = "jake")]
#[command(about = "A command runner and build tool driven by a Jakefile")]
#[command(version)]
struct Cli {
    /// Recipe to run
    #[arg()]
    recipe: Option<String>,

    /// Recipe arguments: positional values or name=value overrides
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// List available recipes
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Print the commands without executing them
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Echo every command and add diagnostics detail
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Auto-accept @confirm prompts
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Use this Jakefile instead of searching
    #[arg(short = 'f', long = "jakefile", value_name = "PATH")]
    jakefile: Option<PathBuf>,

    /// Re-run on file changes (optionally add an extra pattern)
    #[arg(short = 'w', long = "watch", num_args = 0..=1, default_missing_value = "", value_name = "PATTERN")]
    watch: Option<String>,

    /// Run independent recipes in parallel with N workers (default: CPU count)
    #[arg(short = 'j', long = "jobs", num_args = 0..=1, default_missing_value = "0", value_name = "N")]
    jobs: Option<usize>,

    /// One-line list of recipe names
    #[arg(long = "summary")]
    summary: bool,

    /// Recipe names, one per line
    #[arg(long = "short")]
    short: bool,

    /// Emit shell completions and exit
    #[arg(long = "completions", value_name = "SHELL")]
    completions: Option<Shell>,

    /// Copy this executable into ~/.local/bin
    #[arg(long = "install")]
    install: bool,

    /// Remove the executable from ~/.local/bin
    #[arg(long = "uninstall")]
    uninstall: bool,
}

fn main() {
    let cli = Cli::parse();

    if std::env::var_os("NO_COLOR").is_some() || !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "jake", &mut std::io::stdout());
        std::process::exit(0);
    }
    if cli.install {
        std::process::exit(install_executable());
    }
    if cli.uninstall {
        std::process::exit(uninstall_executable());
    }

    let options = JakeOptions {
        jakefile: cli.jakefile,
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        yes: cli.yes,
        jobs: cli.jobs.map(|n| {
            if n == 0 {
                std::thread::available_parallelism()
                    .map(|p| p.get())
                    .unwrap_or(1)
            } else {
                n
            }
        }),
        watch: cli.watch.is_some(),
        watch_pattern: cli.watch.filter(|p| !p.is_empty()),
        capture: false,
    };

    let jake = match Jake::load(options) {
        Ok(jake) => jake,
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            std::process::exit(err.exit_code());
        }
    };

    if cli.list || cli.summary || cli.short {
        if cli.summary {
            print_summary(jake.model());
        } else if cli.short {
            print_short(jake.model());
        } else {
            print_list(jake.model());
        }
        std::process::exit(0);
    }

    match jake.run(cli.recipe.as_deref(), &cli.args) {
        Ok(outcome) => std::process::exit(outcome.exit_code),
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            std::process::exit(err.exit_code());
        }
    }
}

fn print_list(model: &Jakefile) {
    println!("Available recipes:");

    // Group order follows declaration order; ungrouped recipes first.
    let mut groups: Vec<Option<&str>> = Vec::new();
    for recipe in model.recipes.values() {
        let group = recipe.attributes.group.as_deref();
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    for group in groups {
        if let Some(name) = group {
            println!("\n  {}:", name.bold());
        }
        for (qualified, recipe) in &model.recipes {
            if recipe.attributes.group.as_deref() != group {
                continue;
            }
            let mut line = format!("  {}", qualified);
            if recipe.kind == RecipeKind::File {
                line = format!("  {} {}", "file".dimmed(), qualified);
            }
            for param in &recipe.parameters {
                line.push_str(&format!(" {}", param));
            }
            let mut annotations = Vec::new();
            if let Some(desc) = &recipe.attributes.desc {
                annotations.push(desc.clone());
            }
            if !recipe.attributes.aliases.is_empty() {
                annotations.push(format!("alias: {}", recipe.attributes.aliases.join(", ")));
            }
            if recipe.attributes.is_default {
                annotations.push("default".to_string());
            }
            if annotations.is_empty() {
                println!("{}", line);
            } else {
                println!("{:<32} {} {}", line, "#".dimmed(), annotations.join("; ").dimmed());
            }
        }
    }
}

fn print_summary(model: &Jakefile) {
    let names: Vec<&str> = model.recipes.keys().map(String::as_str).collect();
    println!("{}", names.join(" "));
}

fn print_short(model: &Jakefile) {
    for name in model.recipes.keys() {
        println!("{}", name);
    }
}

fn local_bin_target() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/bin/jake"))
}

fn install_executable() -> i32 {
    let target = match local_bin_target() {
        Some(target) => target,
        None => {
            eprintln!("{}", "error: HOME is not set".red());
            return 1;
        }
    };
    let current = match std::env::current_exe() {
        Ok(current) => current,
        Err(err) => {
            eprintln!("{}", format!("error: cannot locate executable: {}", err).red());
            return 1;
        }
    };
    if let Some(parent) = target.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("{}", format!("error: {}: {}", parent.display(), err).red());
            return 1;
        }
    }
    if let Err(err) = std::fs::copy(&current, &target) {
        eprintln!("{}", format!("error: {}: {}", target.display(), err).red());
        return 1;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755));
    }
    println!("installed to {}", target.display());
    0
}

fn uninstall_executable() -> i32 {
    let target = match local_bin_target() {
        Some(target) => target,
        None => {
            eprintln!("{}", "error: HOME is not set".red());
            return 1;
        }
    };
    match std::fs::remove_file(&target) {
        Ok(()) => {
            println!("removed {}", target.display());
            0
        }
        Err(err) => {
            eprintln!("{}", format!("error: {}: {}", target.display(), err).red());
            1
        }
    }
}
