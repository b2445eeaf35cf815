// ============================================================================
// InkCanvas CLI: inspect and export the project store without a window
// ============================================================================
//
// Usage examples:
//   inkcanvas list
//   inkcanvas --store ~/ink-store export 3f2a91c0 flash.png
//   inkcanvas delete 3f2a91c0 --yes
//   inkcanvas session
//
// No GUI is opened in CLI mode.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::io::{self, ProjectStore};
use crate::layers::count_layers;
use crate::logger::format_hms;
use crate::renderer;
use crate::settings::AppSettings;

const SUBCOMMANDS: &[&str] = &["list", "export", "delete", "session"];

/// InkCanvas project store tool.
#[derive(Parser, Debug)]
#[command(
    name = "inkcanvas",
    version,
    about = "InkCanvas project store tool",
    long_about = "List, export and delete saved InkCanvas projects without opening\n\
                  the editor. Run with no arguments to start the desktop app."
)]
pub struct CliArgs {
    /// Project store directory (defaults to the one in the settings file).
    #[arg(long, value_name = "DIR", global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Print saved projects, newest first.
    List,
    /// Render a saved project (no overlays) to a PNG file.
    Export {
        id: String,
        #[arg(value_name = "OUT.png")]
        output: PathBuf,
    },
    /// Delete a saved project.
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Summarize the autosaved session, if any.
    Session,
}

impl CliArgs {
    /// True when the process arguments ask for a store command rather than
    /// the desktop app.  Used by `main()` before creating a window.
    pub fn is_cli_mode() -> bool {
        std::env::args().skip(1).any(|a| {
            SUBCOMMANDS.contains(&a.as_str()) || matches!(a.as_str(), "--store" | "--help" | "-h" | "--version" | "-V")
        })
    }
}

/// Run a store command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let store_dir = args.store.clone().unwrap_or_else(|| AppSettings::load().store_path());
    let store = ProjectStore::new(store_dir);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    match execute(&args.command, &store, &mut stdout, &mut stdin.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

/// Command body, with the terminal abstracted for tests.
pub fn execute(command: &Command, store: &ProjectStore, out: &mut impl Write, input: &mut impl BufRead) -> Result<(), String> {
    match command {
        Command::List => {
            let projects = store.list().map_err(|e| e.to_string())?;
            if projects.is_empty() {
                writeln!(out, "No saved projects in {}", store.dir().display()).map_err(|e| e.to_string())?;
            }
            for p in projects {
                writeln!(
                    out,
                    "{}  {}  {}x{}  {} layers  {}",
                    p.id,
                    p.name,
                    p.config.width,
                    p.config.height,
                    p.layers.len(),
                    format_hms(p.last_modified / 1000)
                )
                .map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        Command::Export { id, output } => {
            let project = store.load(id).map_err(|e| e.to_string())?;
            let layers = io::deserialize_layers(&project.layers).map_err(|e| e.to_string())?;
            let image = renderer::composite(&project.config, &layers, None);
            let png = io::encode_png(&image).map_err(|e| e.to_string())?;
            std::fs::write(output, png).map_err(|e| format!("{}: {}", output.display(), e))?;
            writeln!(
                out,
                "Exported '{}' ({} layers, {}x{}) to {}",
                project.name,
                count_layers(&layers),
                image.width(),
                image.height(),
                output.display()
            )
            .map_err(|e| e.to_string())
        }
        Command::Delete { id, yes } => {
            let project = store.load(id).map_err(|e| e.to_string())?;
            if !*yes {
                write!(out, "Delete project '{}' ({})? [y/N] ", project.name, id).map_err(|e| e.to_string())?;
                out.flush().map_err(|e| e.to_string())?;
                let mut answer = String::new();
                input.read_line(&mut answer).map_err(|e| e.to_string())?;
                if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                    writeln!(out, "Cancelled.").map_err(|e| e.to_string())?;
                    return Ok(());
                }
            }
            store.delete(id).map_err(|e| e.to_string())?;
            writeln!(out, "Deleted '{}'.", project.name).map_err(|e| e.to_string())
        }
        Command::Session => {
            let written = match store.read_session().map_err(|e| e.to_string())? {
                Some(s) => writeln!(
                    out,
                    "Session: {} {}x{}, {} top-level layers, project {}, saved at {}",
                    s.config.name,
                    s.config.width,
                    s.config.height,
                    s.layers.len(),
                    s.project_id.as_deref().unwrap_or("(unsaved)"),
                    format_hms(s.timestamp / 1000)
                ),
                None => writeln!(out, "No session snapshot."),
            };
            written.map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasConfig;
    use crate::editor::Editor;
    use image::{Rgba, RgbaImage};

    fn saved(store: &ProjectStore) -> String {
        let mut ed = Editor::new(CanvasConfig::custom(40, 30));
        ed.add_layer(Some(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))));
        ed.save_project(store, 16).unwrap()
    }

    fn run_cmd(cmd: Command, store: &ProjectStore, stdin: &str) -> (Result<(), String>, String) {
        let mut out = Vec::new();
        let mut input = std::io::Cursor::new(stdin.as_bytes().to_vec());
        let r = execute(&cmd, store, &mut out, &mut input);
        (r, String::from_utf8(out).unwrap())
    }

    #[test]
    fn parses_subcommands() {
        let args = CliArgs::try_parse_from(["inkcanvas", "--store", "/tmp/s", "delete", "abc", "--yes"]).unwrap();
        assert_eq!(args.store, Some(PathBuf::from("/tmp/s")));
        assert_eq!(
            args.command,
            Command::Delete {
                id: "abc".into(),
                yes: true
            }
        );
        assert!(CliArgs::try_parse_from(["inkcanvas", "export", "abc"]).is_err());
    }

    #[test]
    fn list_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let id = saved(&store);

        let (r, text) = run_cmd(Command::List, &store, "");
        r.unwrap();
        assert!(text.contains(&id));
        assert!(text.contains("40x30"));

        let out_path = dir.path().join("out.png");
        let (r, _) = run_cmd(
            Command::Export {
                id: id.clone(),
                output: out_path.clone(),
            },
            &store,
            "",
        );
        r.unwrap();
        let png = io::decode_image(&std::fs::read(out_path).unwrap()).unwrap();
        assert_eq!(png.dimensions(), (40, 30));
    }

    #[test]
    fn delete_prompts_unless_yes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let id = saved(&store);

        let (r, text) = run_cmd(Command::Delete { id: id.clone(), yes: false }, &store, "n\n");
        r.unwrap();
        assert!(text.contains("Cancelled"));
        assert_eq!(store.list().unwrap().len(), 1);

        let (r, _) = run_cmd(Command::Delete { id: id.clone(), yes: false }, &store, "yes\n");
        r.unwrap();
        assert!(store.list().unwrap().is_empty());

        let (r, _) = run_cmd(Command::Delete { id, yes: true }, &store, "");
        assert!(r.is_err());
    }

    #[test]
    fn session_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let (r, text) = run_cmd(Command::Session, &store, "");
        r.unwrap();
        assert!(text.contains("No session"));

        let mut ed = Editor::new(CanvasConfig::custom(20, 20));
        ed.add_layer(None);
        store.write_session(&ed.snapshot().unwrap()).unwrap();
        let (_, text) = run_cmd(Command::Session, &store, "");
        assert!(text.contains("1 top-level layers"));
        assert!(text.contains("(unsaved)"));
    }
}
