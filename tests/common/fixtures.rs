//! Morphologies shared by the integration tests

use rxd_rs::morphology::{Morphology, Section, SectionId};

/// Unbranched cable along +x starting at the origin
pub fn rod(length: f64, diam: f64, nseg: usize) -> (Morphology, SectionId) {
    let mut morphology = Morphology::new();
    let dend = morphology.add_section(Section::cylinder("dend", [0.0; 3], length, diam, nseg).unwrap());
    (morphology, dend)
}

/// Soma with one dendrite at its far end and one in its middle
///
/// ```text
///   soma ──┬────────── dend_a (x = 1)
///          └──────── dend_b (x = 0.5)
/// ```
pub fn branched_cell() -> (Morphology, [SectionId; 3]) {
    let mut morphology = Morphology::new();
    let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1).unwrap());
    let dend_a = morphology.add_section(Section::cylinder("dend_a", [10.0, 0.0, 0.0], 20.0, 1.0, 4).unwrap());
    let dend_b = morphology.add_section(Section::cylinder("dend_b", [5.0, 0.0, 0.0], 15.0, 0.8, 3).unwrap());
    morphology.connect(dend_a, soma, 1.0).unwrap();
    morphology.connect(dend_b, soma, 0.5).unwrap();
    (morphology, [soma, dend_a, dend_b])
}

/// Thick soma with `count` identical dendrites attached at its far end
pub fn soma_with_dendrites(count: usize) -> (Morphology, SectionId, Vec<SectionId>) {
    let mut morphology = Morphology::new();
    let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 6.0, 6.0, 1).unwrap());
    let dendrites = (0..count)
        .map(|i| {
            let name = format!("dend{i}");
            let dend = morphology.add_section(Section::cylinder(&name, [6.0, 0.0, 0.0], 10.0, 1.0, 5).unwrap());
            morphology.connect(dend, soma, 1.0).unwrap();
            dend
        })
        .collect();
    (morphology, soma, dendrites)
}
