//! Global invariants of complete runs on jittered lattices.

use std::collections::{BTreeSet, HashMap, HashSet};

use approx::assert_relative_eq;
use tess::core::algorithms::local_tessellation::tessellate_block;
use tess::core::block::GhostSource;
use tess::geometry::kernel::LabeledPoint;
use tess::geometry::point::particle_to_point;
use tess::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn lattice(tot_blocks: usize, wrap: bool, walls: bool, ghost_margin: Option<f64>) -> TessConfig {
    let config = TessConfig {
        tot_blocks,
        domain_size: [6; 3],
        domain_min: [0.0; 3],
        domain_max: [6.0; 3],
        jitter: 0.25,
        wrap,
        walls,
        max_rounds: 12,
        ghost_margin,
        seed: 7,
        ..TessConfig::default()
    };
    config.validate().unwrap();
    config
}

/// Runs without output and keeps the block store for inspection.
fn run_keeping_store(config: &TessConfig) -> (TessRun, BlockStore) {
    let mut store = generate_blocks(&SingleProcess, config).unwrap();
    let run = tessellate(&SingleProcess, &mut store, &domain_info(config), config).unwrap();
    (run, store)
}

#[test]
fn ghosts_resolve_to_their_owner_particles() {
    init_tracing();
    for (wrap, walls) in [(false, false), (true, false), (false, true)] {
        let config = lattice(8, wrap, walls, Some(0.6));
        let (_, store) = run_keeping_store(&config);
        let extent = domain_info(&config).extent();
        let mut checked = 0;
        for block in store.blocks() {
            for (i, record) in block.ghosts().iter().enumerate() {
                if record.is_wall() {
                    continue;
                }
                let owner = store.get(record.provenance.gid).unwrap();
                let original = owner.original_particles()[record.provenance.nid as usize];
                let expected = record.provenance.wrap.apply(&original, extent);
                let ghost = block.all_particles()[block.num_original() + i];
                for a in 0..3 {
                    assert_relative_eq!(ghost[a], expected[a], epsilon = 1e-4);
                }
                checked += 1;
            }
        }
        assert!(checked > 0, "no ghosts exchanged (wrap {wrap}, walls {walls})");
    }
}

#[test]
fn ghosts_are_never_received_twice() {
    init_tracing();
    let config = lattice(8, true, false, Some(0.3));
    let (run, store) = run_keeping_store(&config);
    assert!(run.rounds.len() > 1, "expected several rounds to exercise incremental sends");
    for block in store.blocks() {
        let keys: HashSet<_> = block.ghosts().iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), block.ghosts().len(), "block {}", block.gid());
        for li in 0..block.links().len() {
            let received: HashSet<_> = block.received_from(li).iter().collect();
            assert_eq!(received.len(), block.received_from(li).len());
        }
        for record in block.ghosts() {
            if let GhostSource::Link(li) = record.source {
                let link = block.links()[li as usize];
                assert_eq!(link.gid, record.provenance.gid);
                assert_eq!(link.wrap.reversed(), record.provenance.wrap);
            }
        }
    }
}

#[test]
fn tetrahedron_slots_add_up() {
    init_tracing();
    for wrap in [false, true] {
        let (run, _) = run_keeping_store(&lattice(8, wrap, false, None));
        for block in &run.blocks {
            let rem = block.num_rem_tets();
            assert_eq!(block.rem_tet_gids.len(), 4 * rem);
            assert_eq!(block.rem_tet_nids.len(), 4 * rem);
            assert_eq!(block.rem_tet_wrap_dirs.len(), 4 * rem);
            let slots = 4 * block.loc_tets.len() + block.rem_tet_gids.len();
            assert_eq!(slots, 4 * block.num_tets());

            let identities = block.tet_identities();
            assert_eq!(identities.len(), block.num_tets());
            assert_eq!(block.vert_to_tet.len(), block.particles.len());
            for (nid, &t) in block.vert_to_tet.iter().enumerate() {
                let mine = |p: &Provenance| p.gid == block.gid && p.nid as usize == nid && p.wrap.is_none();
                if t < 0 {
                    assert!(identities.iter().all(|tet| !tet.iter().any(mine)));
                } else {
                    let tet = &identities[usize::try_from(t).unwrap()];
                    assert!(tet.iter().any(mine), "vert_to_tet[{nid}] = {t} misses the site");
                }
            }
        }
    }
}

#[test]
fn complete_cells_only_accumulate() {
    init_tracing();
    let (run, store) = run_keeping_store(&lattice(8, false, false, Some(0.3)));
    assert!(run.rounds.len() > 1);
    for w in run.rounds.windows(2) {
        assert!(w[1].counts.complete >= w[0].counts.complete);
        assert!(w[1].counts.unbounded >= w[0].counts.unbounded);
        assert!(w[1].margin > w[0].margin);
    }
    for block in store.blocks() {
        assert!(block.cell_states().iter().all(|s| !s.is_pending()));
    }
}

#[test]
fn retessellation_is_idempotent() {
    init_tracing();
    let (_, store) = run_keeping_store(&lattice(8, false, false, None));
    let kernel = KernelChoice::default().build();
    for block in store.blocks() {
        let a = tessellate_block(kernel.as_ref(), block).unwrap();
        let b = tessellate_block(kernel.as_ref(), block).unwrap();
        assert_eq!(a, b);
        assert_eq!(Some(&a), block.tessellation());
    }
}

/// Canonical, sorted global-index quadruples of every emitted tetrahedron.
fn emitted_tets(blocks: &[TessBlock]) -> (Vec<[u32; 4]>, Vec<Particle>) {
    let mut sorted: Vec<&TessBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| b.gid);
    let mut offsets = HashMap::new();
    let mut particles = Vec::new();
    for b in &sorted {
        offsets.insert(b.gid, u32::try_from(particles.len()).unwrap());
        particles.extend_from_slice(&b.particles);
    }
    let mut tets = Vec::new();
    for b in &sorted {
        for tet in b.tet_identities() {
            let mut t = tet.map(|p| {
                assert!(p.wrap.is_none());
                offsets[&p.gid] + p.nid
            });
            t.sort_unstable();
            tets.push(t);
        }
    }
    (tets, particles)
}

fn global_delaunay(particles: &[Particle]) -> BTreeSet<[u32; 4]> {
    let points: Vec<LabeledPoint> = particles
        .iter()
        .zip(0_u32..)
        .map(|(p, label)| LabeledPoint {
            point: particle_to_point(p),
            label,
        })
        .collect();
    let out = KernelChoice::default().build().triangulate(&points).unwrap();
    out.tets
        .iter()
        .map(|t| {
            let mut g = t.map(|v| out.labels[v as usize]);
            g.sort_unstable();
            g
        })
        .collect()
}

#[test]
fn union_of_emitted_tets_is_the_global_delaunay() {
    init_tracing();
    let (run, _) = run_keeping_store(&lattice(8, false, false, None));
    let (tets, particles) = emitted_tets(&run.blocks);
    assert_eq!(particles.len(), 216);
    let unique: BTreeSet<_> = tets.iter().copied().collect();
    assert_eq!(unique.len(), tets.len(), "a tetrahedron was emitted twice");
    assert_eq!(unique, global_delaunay(&particles));
    assert_eq!(run.total_tets, tets.len() as u64);
}

#[test]
fn thread_ranks_match_a_single_process() {
    init_tracing();
    let config = lattice(8, false, false, None);
    let single = run(&SingleProcess, &config).unwrap();
    let per_rank = ThreadWorld::run(3, |comm| run(&comm, &config).unwrap());

    let mut blocks: Vec<TessBlock> = per_rank.iter().flat_map(|r| r.blocks.clone()).collect();
    blocks.sort_by_key(|b| b.gid);
    assert_eq!(blocks.len(), single.blocks.len());
    for r in &per_rank {
        assert_eq!(r.counts, single.counts);
        assert_eq!(r.total_tets, single.total_tets);
        assert_eq!(r.rounds.len(), single.rounds.len());
    }
    for (mut a, mut b) in blocks.into_iter().zip(single.blocks.iter().cloned()) {
        for l in a.links.iter_mut().chain(b.links.iter_mut()) {
            l.proc = 0;
        }
        assert_eq!(a, b);
    }

    let (tets, particles) = emitted_tets(&per_rank.into_iter().flat_map(|r| r.blocks).collect::<Vec<_>>());
    assert_eq!(tets.iter().copied().collect::<BTreeSet<_>>(), global_delaunay(&particles));
}

#[test]
fn walls_close_every_cell() {
    init_tracing();
    let (run, _) = run_keeping_store(&lattice(8, false, true, None));
    assert_eq!(run.counts.pending, 0);
    assert_eq!(run.counts.unbounded, 0);
    assert_eq!(run.counts.complete, 216);
    for block in &run.blocks {
        // Mirrors never appear in emitted tetrahedra.
        for tet in block.tet_identities() {
            for p in tet {
                assert!((p.gid as usize) < 8);
                assert!(p.wrap.is_none());
            }
        }
    }
}

#[cfg(feature = "slow-tests")]
#[test]
fn larger_periodic_run_completes() {
    init_tracing();
    let config = TessConfig {
        tot_blocks: 27,
        domain_size: [18; 3],
        domain_max: [18.0; 3],
        wrap: true,
        max_rounds: 12,
        ..TessConfig::default()
    };
    let per_rank = ThreadWorld::run(4, |comm| run(&comm, &config).unwrap());
    assert_eq!(per_rank[0].counts.complete, 18 * 18 * 18);
    let blocks: usize = per_rank.iter().map(|r| r.blocks.len()).sum();
    assert_eq!(blocks, 27);
}
