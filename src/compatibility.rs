//! Exon/junction to isoform compatibility for a single gene

use crate::types::{Component, Gene};
use std::collections::{BTreeMap, HashMap};

/// Isoforms of one gene with identical exon lists. Reads can never tell the
/// members apart, so they are estimated as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoformGroup {
    pub members: Vec<usize>,
}

impl IsoformGroup {
    pub fn representative(&self) -> usize {
        self.members[0]
    }

    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }
}

/// For every exon and junction of a gene, the isoforms that contain it
#[derive(Debug, Clone)]
pub struct CompatibilityIndex {
    gene: usize,
    isoform_count: usize,
    components: BTreeMap<Component, Vec<usize>>,
    groups: Vec<IsoformGroup>,
    group_of: Vec<usize>,
}

impl CompatibilityIndex {
    pub fn build(gene: &Gene) -> Self {
        let mut components: BTreeMap<Component, Vec<usize>> = BTreeMap::new();

        for (i, isoform) in gene.isoforms().iter().enumerate() {
            for &e in isoform.exons() {
                components.entry(Component::Exon(e)).or_default().push(i);
            }
            for (upstream, downstream) in isoform.junctions() {
                components
                    .entry(Component::Junction {
                        upstream,
                        downstream,
                    })
                    .or_default()
                    .push(i);
            }
        }

        let mut groups: Vec<IsoformGroup> = Vec::new();
        let mut group_of = Vec::with_capacity(gene.isoforms().len());
        let mut by_structure: HashMap<&[usize], usize> = HashMap::new();
        for (i, isoform) in gene.isoforms().iter().enumerate() {
            let group = *by_structure.entry(isoform.exons()).or_insert_with(|| {
                groups.push(IsoformGroup {
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[group].members.push(i);
            group_of.push(group);
        }

        Self {
            gene: gene.id(),
            isoform_count: gene.isoforms().len(),
            components,
            groups,
            group_of,
        }
    }

    pub fn gene(&self) -> usize {
        self.gene
    }

    pub fn isoform_count(&self) -> usize {
        self.isoform_count
    }

    pub fn components(&self) -> impl Iterator<Item = (&Component, &[usize])> {
        self.components.iter().map(|(c, isoforms)| (c, isoforms.as_slice()))
    }

    pub fn isoforms_containing(&self, component: Component) -> &[usize] {
        self.components
            .get(&component)
            .map(|isoforms| isoforms.as_slice())
            .unwrap_or(&[])
    }

    /// Isoforms containing every given component, ascending
    pub fn compatible_isoforms(&self, components: &[Component]) -> Vec<usize> {
        let mut compatible: Vec<usize> = (0..self.isoform_count).collect();
        for &component in components {
            let containing = self.isoforms_containing(component);
            compatible.retain(|i| containing.binary_search(i).is_ok());
            if compatible.is_empty() {
                break;
            }
        }
        compatible
    }

    /// Isoform groups compatible with the components, ascending
    pub fn compatible_groups(&self, components: &[Component]) -> Vec<usize> {
        let mut groups: Vec<usize> = self
            .compatible_isoforms(components)
            .into_iter()
            .map(|i| self.group_of[i])
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    pub fn groups(&self) -> &[IsoformGroup] {
        &self.groups
    }

    pub fn group_of(&self, isoform: usize) -> usize {
        self.group_of[isoform]
    }

    pub fn merged_groups(&self) -> impl Iterator<Item = &IsoformGroup> {
        self.groups.iter().filter(|g| g.is_merged())
    }

    /// Components of `isoform` that are missing from at least one other
    /// isoform of the gene, i.e. those whose reads carry information about it.
    pub fn distinguishing_components(&self, isoform: usize) -> Vec<Component> {
        self.components
            .iter()
            .filter(|(_, isoforms)| {
                isoforms.binary_search(&isoform).is_ok() && isoforms.len() < self.isoform_count
            })
            .map(|(&c, _)| c)
            .collect()
    }
}
