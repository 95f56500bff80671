use std::path::{Path, PathBuf};

use bone_rig_core::{BoneId, BoneOverrides, BoneParams, DrawList, RigDescription, Skeleton};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> bone_rig_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            rig,
            frames,
            dt,
            flip,
        } => {
            let description = RigDescription::from_path(&rig)?;
            tracing::info!(rig = %rig.display(), "loaded rig description");
            let mut skeleton = Skeleton::from_description(&description)?;
            if flip {
                skeleton.flip();
            }
            run_simulation(&mut skeleton, frames, dt)
        }
        Commands::Inspect { rig } => run_inspect(&rig),
        Commands::Demo { frames, dt } => {
            let mut skeleton = build_demo()?;
            run_simulation(&mut skeleton, frames, dt)
        }
    }
}

fn run_simulation(skeleton: &mut Skeleton, frames: u32, dt: f32) -> bone_rig_core::Result<()> {
    tracing::info!(frames, dt, bones = skeleton.len() - 1, "stepping skeleton");

    let mut draws = DrawList::new();
    for frame in 0..frames {
        skeleton.update(dt);
        draws.clear();
        let drawn = skeleton.draw(&mut draws);
        tracing::debug!(frame, drawn, "frame complete");
    }

    tracing::info!(
        draws = draws.len(),
        layers = ?skeleton.layers().range(),
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&skeleton.snapshot())?);
    Ok(())
}

fn run_inspect(rig: &Path) -> bone_rig_core::Result<()> {
    let description = RigDescription::from_path(rig)?;
    let skeleton = Skeleton::from_description(&description)?;

    match skeleton.layers().range() {
        Some((min, max)) => println!("layers {min}..={max}"),
        None => println!("no layers in use"),
    }
    print_tree(&skeleton, skeleton.root(), 0);
    Ok(())
}

fn print_tree(skeleton: &Skeleton, id: BoneId, depth: usize) {
    let Some(bone) = skeleton.bone(id) else {
        return;
    };
    for (name, child) in bone.children() {
        let Some(child_bone) = skeleton.bone(child) else {
            continue;
        };
        let marker = if child_bone.is_template() { " [template]" } else { "" };
        let mut vars: Vec<&str> = child_bone.vars.iter().flat_map(|vars| vars.keys()).collect();
        vars.sort_unstable();
        let vars = if vars.is_empty() {
            String::new()
        } else {
            format!(" vars: {}", vars.join(", "))
        };
        println!(
            "{:indent$}{name} (layer {}){marker}{vars}",
            "",
            child_bone.layer(),
            indent = depth * 2
        );
        print_tree(skeleton, child, depth + 1);
    }
}

/// Small walking figure: a torso with a templated left leg that is stamped
/// out again as the right leg.
fn build_demo() -> bone_rig_core::Result<Skeleton> {
    let mut skeleton = Skeleton::new(0.0, 0.0);
    let root = skeleton.root();

    let torso = skeleton.attach_child(
        root,
        BoneParams::new("torso")
            .image("torso.png")
            .origin(8.0, 4.0)
            .layer(0),
    )?;
    skeleton.attach_child(
        torso,
        BoneParams::new("head")
            .image("head.png")
            .connect(8.0, -12.0)
            .rotvel(0.5),
    )?;
    let left_leg = skeleton.attach_child(
        torso,
        BoneParams::new("left_leg")
            .image("leg.png")
            .connect(5.0, 20.0)
            .rotvel(2.0)
            .template(true),
    )?;
    skeleton.attach_child(left_leg, BoneParams::new("foot").image("foot.png").connect(0.0, 12.0))?;
    skeleton.add_template(
        torso,
        left_leg,
        BoneOverrides::named("right_leg")
            .connect(11.0, 20.0)
            .rotvel(-2.0)
            .layer(-1),
    )?;
    Ok(skeleton)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Pose and step 2D bone rigs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Step a rig described in a JSON file and print the final poses.
    Simulate {
        /// Path to the rig description.
        rig: PathBuf,
        /// Number of update/draw ticks to run.
        #[arg(short, long, default_value_t = 60)]
        frames: u32,
        /// Time step passed to every update.
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f32,
        /// Mirror the skeleton horizontally before stepping.
        #[arg(long)]
        flip: bool,
    },
    /// Print the bone tree of a rig description.
    Inspect {
        /// Path to the rig description.
        rig: PathBuf,
    },
    /// Step a built-in walking figure.
    Demo {
        #[arg(short, long, default_value_t = 60)]
        frames: u32,
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f32,
    },
}
