use anyhow::Result;
use polymer_common::Vec3;
use rand::prelude::*;
use rand::seq::SliceRandom;
use std::collections::HashSet;

const NEIGHBOR_STEPS: [(i64, i64, i64); 6] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

const MAX_GROWTH_ATTEMPTS: usize = 100_000;

/// Lattice box side used to grow an `n`-monomer conformation: roughly twice
/// the sites the walk occupies, so growth rarely jams.
pub fn growth_box_side(n: usize) -> i64 {
    ((2 * n) as f64).cbrt().ceil() as i64
}

/// Grows a self-avoiding walk of `n` unit steps on the cubic lattice inside
/// `[0, box_side)^3`. Dead ends restart the walk; the attempt budget turns a
/// jammed geometry into an error instead of a hang.
pub fn grow_cubic(n: usize, box_side: i64, rng: &mut StdRng) -> Result<Vec<Vec3>> {
    if n == 0 {
        anyhow::bail!("Cannot grow a conformation with 0 monomers.");
    }
    if box_side * box_side * box_side < n as i64 {
        anyhow::bail!(
            "Box side {} has fewer than {} lattice sites.",
            box_side, n
        );
    }

    for _attempt in 0..MAX_GROWTH_ATTEMPTS {
        if let Some(sites) = try_grow(n, box_side, rng) {
            return Ok(sites
                .into_iter()
                .map(|(x, y, z)| Vec3::new(x as f64, y as f64, z as f64))
                .collect());
        }
    }
    anyhow::bail!(
        "Failed to grow a {}-monomer self-avoiding walk in a {}^3 box after {} attempts.",
        n, box_side, MAX_GROWTH_ATTEMPTS
    )
}

fn try_grow(n: usize, box_side: i64, rng: &mut StdRng) -> Option<Vec<(i64, i64, i64)>> {
    let start = (
        rng.random_range(0..box_side),
        rng.random_range(0..box_side),
        rng.random_range(0..box_side),
    );

    let mut sites = Vec::with_capacity(n);
    let mut occupied = HashSet::with_capacity(n);
    sites.push(start);
    occupied.insert(start);

    let mut directions = NEIGHBOR_STEPS;
    let mut head = start;
    while sites.len() < n {
        directions.shuffle(rng);

        let next = directions.iter().find_map(|&(dx, dy, dz)| {
            let candidate = (head.0 + dx, head.1 + dy, head.2 + dz);
            let in_box = (0..box_side).contains(&candidate.0)
                && (0..box_side).contains(&candidate.1)
                && (0..box_side).contains(&candidate.2);
            (in_box && !occupied.contains(&candidate)).then_some(candidate)
        });

        match next {
            Some(site) => {
                sites.push(site);
                occupied.insert(site);
                head = site;
            }
            None => return None, // Dead end, restart the walk.
        }
    }
    Some(sites)
}
