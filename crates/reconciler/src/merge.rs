//! Layered resolver spec merging.
//!
//! Pure functions only: the caller lists the layered inputs, sorts them with
//! [`sort_by_layer`] and folds them with [`merge_resolver_specs`].
//!
//! Layers are processed from least to most authoritative:
//!
//! - search domains of each layer are prepended, so the most authoritative
//!   layer's domains come first; duplicates are kept;
//! - servers of sources on the same layer are concatenated;
//! - a higher layer replaces the servers of the layers below it, except that
//!   an address family the higher layer leaves out keeps the lower layer's
//!   servers of that family.

use std::net::IpAddr;

use itertools::Itertools;
use netresolv_resources::{ConfigLayer, ResolverSpec, Resource};

/// Sort layered inputs ascending by layer.
///
/// The sort is stable: sources on the same layer keep their list order.
pub fn sort_by_layer(resources: Vec<Resource<ResolverSpec>>) -> Vec<ResolverSpec> {
    resources
        .into_iter()
        .map(|resource| resource.spec)
        .sorted_by_key(|spec| spec.config_layer)
        .collect()
}

/// Merge specs sorted ascending by layer into a single spec.
///
/// An empty input yields an empty spec on [`ConfigLayer::Default`].
pub fn merge_resolver_specs<'a, I>(specs: I) -> ResolverSpec
where
    I: IntoIterator<Item = &'a ResolverSpec>,
{
    let mut merged = ResolverSpec::default();
    let mut current_layer: Option<ConfigLayer> = None;

    for spec in specs {
        merged.search_domains = spec
            .search_domains
            .iter()
            .cloned()
            .chain(std::mem::take(&mut merged.search_domains))
            .collect();

        if current_layer == Some(spec.config_layer) {
            merged.dns_servers.extend(spec.dns_servers.iter().copied());
        } else {
            current_layer = Some(spec.config_layer);
            merged.dns_servers =
                merge_dns_servers(std::mem::take(&mut merged.dns_servers), &spec.dns_servers);
        }
    }

    merged.config_layer = current_layer.unwrap_or_default();
    merged
}

/// Override `old` servers with `new` ones, keeping the address family `new` omits.
pub fn merge_dns_servers(old: Vec<IpAddr>, new: &[IpAddr]) -> Vec<IpAddr> {
    if old.is_empty() {
        return new.to_vec();
    }

    let new_has_v4 = new.iter().any(IpAddr::is_ipv4);
    let new_has_v6 = new.iter().any(IpAddr::is_ipv6);
    let old_has_v4 = old.iter().any(IpAddr::is_ipv4);
    let old_has_v6 = old.iter().any(IpAddr::is_ipv6);

    if old_has_v4 && !new_has_v4 {
        preserve_family(new, old, IpAddr::is_ipv4)
    } else if old_has_v6 && !new_has_v6 {
        preserve_family(new, old, IpAddr::is_ipv6)
    } else {
        new.to_vec()
    }
}

fn preserve_family(new: &[IpAddr], old: Vec<IpAddr>, family: fn(&IpAddr) -> bool) -> Vec<IpAddr> {
    new.iter()
        .copied()
        .chain(old.into_iter().filter(|addr| family(addr)))
        .collect()
}
