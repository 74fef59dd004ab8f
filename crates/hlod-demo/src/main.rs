//! Demo binary that streams a row of HLOD nodes past a moving viewer.
//!
//! Each node has a high representation (an authored object whose mesh and
//! materials are streamed in) and a low representation (a streamed prefab).
//! Nodes within `switch_distance` of the viewer show high, the rest show low;
//! the outgoing representation is released once the incoming one is ready.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p hlod-demo -- --nodes 32 --max-in-flight 2`.

use std::cell::RefCell;
use std::rc::Rc;

use clap::Parser;
use glam::Vec3;
use hlod_config::{CliArgs, Config, DemoConfig, default_config_dir};
use hlod_stream::{
    Level, LoadScheduler, NodeId, NodeLoadController, NodeLoadState, ObjectId, SceneGraph,
    SimulatedProvider, SimulatedScene, StreamingError,
};
use tracing::{info, warn};

/// Nodes per scene cell. Each cell has its own controller.
const CELL_SIZE: u32 = 8;

/// Ticks between progress reports.
const REPORT_INTERVAL: u32 = 20;

struct DemoNode {
    position: Vec3,
    cell: usize,
    high: NodeId,
    low: NodeId,
    /// Representation currently visible.
    shown: Option<Level>,
    /// Representation the viewer distance asks for.
    wanted: Option<Level>,
}

impl DemoNode {
    fn id(&self, level: Level) -> NodeId {
        match level {
            Level::High => self.high,
            Level::Low => self.low,
        }
    }
}

/// Sent from node-ready callbacks to the tick loop.
#[derive(Debug)]
struct Ready {
    node: usize,
    level: Level,
    object: ObjectId,
}

#[derive(Debug, Default, PartialEq)]
struct Summary {
    ticks: u32,
    high_shown: u32,
    low_shown: u32,
    load_calls: usize,
    released: usize,
}

struct World {
    scheduler: LoadScheduler<SimulatedProvider>,
    scene: SimulatedScene,
    cells: Vec<NodeLoadController>,
    nodes: Vec<DemoNode>,
    ready: Rc<RefCell<Vec<Ready>>>,
}

impl World {
    fn build(config: &Config) -> Result<Self, StreamingError> {
        let demo = &config.demo;
        let mut scheduler = LoadScheduler::new(SimulatedProvider::new(), config.scheduler.clone());
        let mut scene = SimulatedScene::new();

        let mut roots = Vec::new();
        let mut cells = Vec::new();
        for c in 0..demo.node_count.div_ceil(CELL_SIZE) {
            let root = scene.spawn(&format!("cell-{c}"), None);
            roots.push(root);
            cells.push(NodeLoadController::new(&mut scheduler, root, config.controller.clone()));
        }

        let mut nodes = Vec::with_capacity(demo.node_count as usize);
        for i in 0..demo.node_count {
            let cell = (i / CELL_SIZE) as usize;
            let object = scene.spawn(&format!("node-{i}"), Some(roots[cell]));
            let controller = &mut cells[cell];
            let unique_material = format!("materials/node_{i}");
            let high = controller.add_high_object(
                object,
                &format!("meshes/node_{i}"),
                &["materials/shared_stone", unique_material.as_str()],
            )?;
            let low = controller.add_low_object(&format!("prefabs/cluster_{i}"))?;

            if demo.fail_every > 0 && (i + 1) % demo.fail_every == 0 {
                scheduler.provider_mut().fail_address(&unique_material);
            }
            nodes.push(DemoNode {
                position: Vec3::new(i as f32 * demo.node_spacing, 0.0, 10.0),
                cell,
                high,
                low,
                shown: None,
                wanted: None,
            });
        }

        for controller in &mut cells {
            controller.install(&mut scene);
            controller.start(&mut scene);
        }
        info!(
            "built {} nodes in {} cells ({} addresses, {} loads in flight at most)",
            nodes.len(),
            cells.len(),
            cells.iter().map(|c| c.address_count()).sum::<usize>(),
            scheduler.config().max_in_flight
        );

        Ok(Self {
            scheduler,
            scene,
            cells,
            nodes,
            ready: Rc::new(RefCell::new(Vec::new())),
        })
    }

    /// Requests the representation each node needs at the viewer's position.
    fn request_levels(&mut self, viewer: Vec3, demo: &DemoConfig) -> Result<(), StreamingError> {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let distance = node.position.distance(viewer);
            let level = if distance < demo.switch_distance {
                Level::High
            } else {
                Level::Low
            };
            if node.wanted == Some(level) {
                continue;
            }

            let controller = &mut self.cells[node.cell];
            // A representation that never became visible is not needed any more.
            if let Some(previous) = node.wanted.replace(level)
                && node.shown != Some(previous)
            {
                controller.release_representation(
                    &mut self.scheduler,
                    &mut self.scene,
                    node.id(previous),
                    previous,
                );
            }

            let ready = Rc::clone(&self.ready);
            controller.request_representation(
                &mut self.scheduler,
                node.id(level),
                level,
                distance,
                move |object| {
                    ready.borrow_mut().push(Ready {
                        node: index,
                        level,
                        object,
                    })
                },
            )?;
        }
        Ok(())
    }

    fn pump(&mut self, completions: u32) {
        for _ in 0..completions {
            if !self.scheduler.provider_mut().complete_next() {
                break;
            }
        }
        self.scheduler.update();
        for controller in &mut self.cells {
            controller.update(&mut self.scene);
        }
    }

    /// Shows newly ready representations and releases the ones they replace.
    fn swap_ready(&mut self, summary: &mut Summary) {
        let ready: Vec<Ready> = self.ready.borrow_mut().drain(..).collect();
        for Ready {
            node,
            level,
            object,
        } in ready
        {
            let entry = &mut self.nodes[node];
            if entry.wanted != Some(level) {
                continue;
            }
            self.scene.set_active(object, true);
            let previous = entry.shown.replace(level);
            if previous == Some(level) {
                continue;
            }
            match level {
                Level::High => summary.high_shown += 1,
                Level::Low => summary.low_shown += 1,
            }
            if let Some(previous) = previous {
                self.cells[entry.cell].release_representation(
                    &mut self.scheduler,
                    &mut self.scene,
                    entry.id(previous),
                    previous,
                );
            }
        }
    }

    fn failed_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| {
                self.cells[node.cell].node_state(node.high, Level::High)
                    == Some(NodeLoadState::Failed)
            })
            .count()
    }

    fn report(&self, tick: u32, viewer: Vec3) {
        let shown_high = self
            .nodes
            .iter()
            .filter(|node| node.shown == Some(Level::High))
            .count();
        info!(
            "tick {tick}: viewer x={:.1}, {} queued, {} in flight, {} high / {} nodes shown high",
            viewer.x,
            self.scheduler.queued_len(),
            self.scheduler.in_flight_len(),
            shown_high,
            self.nodes.len()
        );
        let failed = self.failed_nodes();
        if failed > 0 {
            warn!("{failed} nodes stuck on a failed high load");
        }
    }
}

fn run(config: &Config) -> Result<Summary, StreamingError> {
    let demo = &config.demo;
    let mut world = World::build(config)?;
    let mut summary = Summary::default();

    let mut viewer = Vec3::new(-demo.switch_distance, 0.0, 0.0);
    for tick in 0..demo.ticks {
        world.request_levels(viewer, demo)?;
        world.pump(demo.completions_per_tick);
        world.swap_ready(&mut summary);

        if tick % REPORT_INTERVAL == 0 {
            world.report(tick, viewer);
        }
        viewer.x += demo.viewer_speed;
        summary.ticks += 1;
    }

    for controller in &mut world.cells {
        controller.stop(&mut world.scheduler, &mut world.scene);
    }
    world.scheduler.shutdown();

    summary.load_calls = world.scheduler.provider().load_calls().len();
    summary.released = world.scheduler.provider().released().len();
    info!(
        "done after {} ticks: {} high swaps, {} low swaps, {} loads, {} releases",
        summary.ticks, summary.high_shown, summary.low_shown, summary.load_calls, summary.released
    );
    Ok(summary)
}

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = match args.config.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}; pass --config <dir>");
            std::process::exit(1);
        }
    };

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    hlod_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config) {
        tracing::error!("demo failed: {e}");
        std::process::exit(1);
    }
}
