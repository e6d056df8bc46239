//! Command-line entry point for the CASTpFold client.

use std::path::PathBuf;
use std::time::Duration;

use castpfold::client::{CastpFoldClient, JobId};
use castpfold::logging;
use castpfold::poll::PollSchedule;
use castpfold::workflow::{self, ResultPaths, RunMode, RunOptions};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), String> {
    let cli = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let client = CastpFoldClient::new();
    let paths = workflow::run(&client, cli.mode, &cli.options).map_err(|err| err.to_string())?;
    report(&paths);
    Ok(())
}

fn report(paths: &ResultPaths) {
    println!("Job id: {}", paths.jobid);
    if let Some(log) = &paths.submit_log {
        println!("Submission log: {}", log.display());
    }
    if let Some(zip) = &paths.zip_path {
        println!("Archive: {}", zip.display());
    }
    if let Some(dir) = &paths.extract_path {
        println!("Extracted: {}", dir.display());
    }
    if let Some(csv) = &paths.pockets_csv {
        println!("Pocket coordinates: {}", csv.display());
    }
    if let Some(txt) = &paths.pockets_txt {
        println!("Mean coordinates: {}", txt.display());
    }
}

#[derive(Debug)]
struct Cli {
    mode: RunMode,
    options: RunOptions,
}

fn parse_args(args: Vec<String>) -> Result<Cli, String> {
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        return Err(help_text());
    }

    let mut submit_only = false;
    let mut submit_download = false;
    let mut download_only = false;
    let mut pdb: Option<PathBuf> = None;
    let mut jobid: Option<String> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut radius = 1.4f64;
    let mut compute_pockets = false;
    let mut wait = 20u64;
    let mut extra_wait = 30u64;
    let mut retries = 1usize;
    let mut email = "N/A".to_string();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-so" | "--submit-only" => submit_only = true,
            "-sd" | "--submit-download" => submit_download = true,
            "-do" | "--download-only" => download_only = true,
            "-p" | "--pdb" => {
                pdb = Some(PathBuf::from(next_value(&args, &mut i, "--pdb")?));
            }
            "-j" | "--jobid" => {
                jobid = Some(next_value(&args, &mut i, "--jobid")?);
            }
            "-d" | "--directory" => {
                out_dir = Some(PathBuf::from(next_value(&args, &mut i, "--directory")?));
            }
            "-r" | "--radius" => {
                radius = parse_number(&next_value(&args, &mut i, "--radius")?, "--radius")?;
            }
            "-pc" | "--pocket" => compute_pockets = true,
            "-w" | "--wait" => {
                wait = parse_number(&next_value(&args, &mut i, "--wait")?, "--wait")?;
            }
            "-ew" | "--extra-wait" => {
                extra_wait =
                    parse_number(&next_value(&args, &mut i, "--extra-wait")?, "--extra-wait")?;
            }
            "-t" | "--retries" => {
                retries = parse_number(&next_value(&args, &mut i, "--retries")?, "--retries")?;
            }
            "--email" => {
                email = next_value(&args, &mut i, "--email")?;
            }
            unknown => return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text())),
        }
        i += 1;
    }

    let selected = [submit_only, submit_download, download_only]
        .iter()
        .filter(|flag| **flag)
        .count();
    if selected != 1 {
        return Err(format!(
            "Choose exactly one of --submit-only, --submit-download, --download-only\n\n{}",
            help_text()
        ));
    }

    let mode = if download_only {
        let jobid = jobid.ok_or("--download-only requires --jobid".to_string())?;
        RunMode::DownloadOnly {
            jobid: JobId::new(jobid),
        }
    } else {
        if pdb.is_none() {
            return Err("--submit-only/--submit-download requires --pdb".to_string());
        }
        if submit_only {
            RunMode::SubmitOnly
        } else {
            RunMode::SubmitAndDownload
        }
    };

    Ok(Cli {
        mode,
        options: RunOptions {
            pdb,
            out_dir,
            radius,
            email,
            schedule: PollSchedule {
                initial_wait: Duration::from_secs(wait),
                extra_wait: Duration::from_secs(extra_wait),
                max_retries: retries,
                ..PollSchedule::default()
            },
            compute_pockets,
        },
    })
}

fn next_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    let next = args
        .get(*i + 1)
        .ok_or_else(|| format!("Missing value for {name}"))?;
    *i += 1;
    Ok(next.clone())
}

fn parse_number<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("Invalid value '{raw}' for {name}"))
}

fn help_text() -> String {
    "Usage: castpfold <mode> [options]\n\n\
Modes (choose one):\n\
  -so, --submit-only       Upload the PDB and print the job id; no download\n\
  -sd, --submit-download   Upload the PDB and download the results\n\
  -do, --download-only     Download results for an existing job (needs --jobid)\n\n\
Options:\n\
  -p,  --pdb <FILE>        Protein structure in PDB format\n\
  -j,  --jobid <ID>        CASTpFold job id to download\n\
  -d,  --directory <DIR>   Output directory (default: the PDB file's parent)\n\
  -r,  --radius <R>        Probe radius in Å, 0.0 to 5.0 (default: 1.4)\n\
  -pc, --pocket            Also write pocket-1 coordinate CSV and mean summary\n\
  -w,  --wait <SECS>       Wait before the first download attempt (default: 20)\n\
  -ew, --extra-wait <SECS> Extra wait before retrying (default: 30)\n\
  -t,  --retries <N>       Extra download retries after the wait (default: 1)\n\
       --email <ADDR>      Optional email forwarded to the server\n\
  -h,  --help              Show this help\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn download_only_without_jobid_is_a_configuration_error() {
        let err = parse_args(args(&["--download-only"])).unwrap_err();
        assert!(err.contains("--jobid"));
    }

    #[test]
    fn submit_modes_require_a_pdb() {
        let err = parse_args(args(&["--submit-only"])).unwrap_err();
        assert!(err.contains("--pdb"));
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        let err = parse_args(args(&["-so", "-do", "-p", "x.pdb"])).unwrap_err();
        assert!(err.contains("exactly one"));
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let cli = parse_args(args(&["-sd", "--pdb", "prot.pdb"])).unwrap();
        assert!(matches!(cli.mode, RunMode::SubmitAndDownload));
        assert_eq!(cli.options.radius, 1.4);
        assert_eq!(cli.options.email, "N/A");
        assert_eq!(cli.options.schedule.initial_wait, Duration::from_secs(20));
        assert_eq!(cli.options.schedule.extra_wait, Duration::from_secs(30));
        assert_eq!(cli.options.schedule.max_retries, 1);
        assert!(!cli.options.compute_pockets);
    }

    #[test]
    fn timing_flags_reshape_the_schedule() {
        let cli = parse_args(args(&[
            "-do", "-j", "j_1", "-w", "0", "-ew", "5", "-t", "3", "-pc",
        ]))
        .unwrap();
        match cli.mode {
            RunMode::DownloadOnly { jobid } => assert_eq!(jobid.as_str(), "j_1"),
            other => panic!("expected download-only, got {other:?}"),
        }
        assert_eq!(cli.options.schedule.initial_wait, Duration::ZERO);
        assert_eq!(cli.options.schedule.extra_wait, Duration::from_secs(5));
        assert_eq!(cli.options.schedule.max_retries, 3);
        assert!(cli.options.compute_pockets);
    }
}
