//! Name matching between discovered datastores and storage objects.
//!
//! Datastores are usually named after the volume that backs them, but not
//! always exactly. The cascade is exact match first, then substring, then
//! reverse substring; substring steps are skipped for names of
//! [`SequencerConfig::MIN_SUBSTRING_MATCH_LEN`] characters or fewer so that
//! short names such as `ds1` do not match `ds10`, `ds11`, ...

use crate::config::SequencerConfig;
use crate::models::{NetworkInterface, ReplicationRelationship, Volume};

/// How a candidate was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// The candidate contains the searched name.
    Substring,
    /// The searched name contains the candidate.
    ReverseSubstring,
}

fn long_enough(name: &str) -> bool {
    name.chars().count() > SequencerConfig::MIN_SUBSTRING_MATCH_LEN
}

/// Relationships whose source or destination volume belongs to `location`.
///
/// Exact volume-name matches short-circuit; otherwise relationships whose
/// volume names contain `location` are returned when the name is long
/// enough. The SVM part of a path never takes part in matching.
pub fn match_relationships<'a>(
    location: &str,
    relationships: &'a [ReplicationRelationship],
) -> (Vec<&'a ReplicationRelationship>, Option<MatchKind>) {
    let exact: Vec<_> = relationships
        .iter()
        .filter(|r| r.source_volume() == location || r.destination_volume() == location)
        .collect();
    if !exact.is_empty() {
        return (exact, Some(MatchKind::Exact));
    }

    if !long_enough(location) {
        return (Vec::new(), None);
    }

    let partial: Vec<_> = relationships
        .iter()
        .filter(|r| {
            r.source_volume().contains(location) || r.destination_volume().contains(location)
        })
        .collect();
    if partial.is_empty() {
        (partial, None)
    } else {
        (partial, Some(MatchKind::Substring))
    }
}

/// The target volume backing `datastore`, if any.
pub fn match_volume<'a>(datastore: &str, volumes: &'a [Volume]) -> Option<(&'a Volume, MatchKind)> {
    if let Some(vol) = volumes.iter().find(|v| v.name == datastore) {
        return Some((vol, MatchKind::Exact));
    }

    if long_enough(datastore) {
        if let Some(vol) = volumes.iter().find(|v| v.name.contains(datastore)) {
            return Some((vol, MatchKind::Substring));
        }
    }

    volumes
        .iter()
        .find(|v| long_enough(&v.name) && datastore.contains(v.name.as_str()))
        .map(|vol| (vol, MatchKind::ReverseSubstring))
}

/// Pick the interface that should serve `protocol` mounts.
///
/// Priority: data role with the exact protocol, data role with a
/// case-insensitive protocol match, any interface advertising the protocol,
/// then any up data interface as a last resort.
pub fn select_interface<'a>(
    interfaces: &'a [NetworkInterface],
    protocol: &str,
) -> Option<&'a NetworkInterface> {
    interfaces
        .iter()
        .find(|lif| lif.is_data() && lif.serves_exact(protocol))
        .or_else(|| interfaces.iter().find(|lif| lif.is_data() && lif.serves(protocol)))
        .or_else(|| interfaces.iter().find(|lif| lif.serves(protocol)))
        .or_else(|| interfaces.iter().find(|lif| lif.is_data() && lif.up))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(source: &str, destination: &str) -> ReplicationRelationship {
        ReplicationRelationship {
            uuid: format!("{source}->{destination}"),
            source_path: source.into(),
            destination_path: destination.into(),
            state: "snapmirrored".into(),
            transfer_state: Some("success".into()),
        }
    }

    fn vol(name: &str) -> Volume {
        Volume {
            uuid: name.into(),
            name: name.into(),
            svm: "svm_dr".into(),
            junction_path: Some(format!("/{name}")),
        }
    }

    fn lif(name: &str, role: &str, protocols: &[&str], up: bool) -> NetworkInterface {
        NetworkInterface {
            name: name.into(),
            address: "10.0.0.1".into(),
            role: role.into(),
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            up,
        }
    }

    #[test]
    fn test_exact_relationship_match_wins() {
        let rels = vec![
            rel("svm_prod:ds_sql01_old", "svm_dr:ds_sql01_old"),
            rel("svm_prod:ds_sql01", "svm_dr:ds_sql01"),
        ];
        let (matches, kind) = match_relationships("ds_sql01", &rels);
        assert_eq!(kind, Some(MatchKind::Exact));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].source_path, "svm_prod:ds_sql01");
    }

    #[test]
    fn test_substring_relationship_fallback() {
        let rels = vec![rel("svm_prod:ds_web_vol", "svm_dr:ds_web_vol_dst")];
        let (matches, kind) = match_relationships("ds_web", &rels);
        assert_eq!(kind, Some(MatchKind::Substring));
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_short_names_never_substring_match() {
        let rels = vec![rel("svm_prod:ds10", "svm_dr:ds10")];
        let (matches, kind) = match_relationships("ds1", &rels);
        assert!(matches.is_empty());
        assert_eq!(kind, None);

        // Exactly four characters is long enough
        let rels = vec![rel("svm_prod:ds100", "svm_dr:ds100")];
        let (matches, _) = match_relationships("ds10", &rels);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_svm_name_never_matches() {
        let rels = vec![
            rel("svm_prod:ds_web", "svm_dr:ds_web"),
            rel("svm_prod:ds_db", "svm_dr:ds_db"),
        ];
        let (matches, kind) = match_relationships("prod", &rels);
        assert!(matches.is_empty());
        assert_eq!(kind, None);
    }

    #[test]
    fn test_volume_cascade() {
        let volumes = vec![vol("ds_app01_mirror"), vol("app02"), vol("ds_app03")];

        assert_eq!(match_volume("ds_app03", &volumes).map(|(v, k)| (v.name.as_str(), k)),
            Some(("ds_app03", MatchKind::Exact)));
        assert_eq!(match_volume("ds_app01", &volumes).map(|(v, k)| (v.name.as_str(), k)),
            Some(("ds_app01_mirror", MatchKind::Substring)));
        assert_eq!(match_volume("nfs_app02_ds", &volumes).map(|(v, k)| (v.name.as_str(), k)),
            Some(("app02", MatchKind::ReverseSubstring)));
        assert!(match_volume("missing", &volumes).is_none());
    }

    #[test]
    fn test_volume_short_candidates_ignored() {
        let volumes = vec![vol("ds1"), vol("ds10")];
        assert!(match_volume("ds", &volumes).is_none());
        assert!(match_volume("xds1x", &volumes).is_none());
    }

    #[test]
    fn test_interface_priority() {
        let lifs = vec![
            lif("any_up", "data", &["cifs"], true),
            lif("advertises", "intercluster", &["NFS"], true),
            lif("case_insensitive", "data", &["data_nfs"], true),
            lif("exact", "data", &["nfs"], true),
        ];
        assert_eq!(select_interface(&lifs, "nfs").unwrap().name, "exact");
        assert_eq!(select_interface(&lifs[..3], "nfs").unwrap().name, "case_insensitive");
        assert_eq!(select_interface(&lifs[..2], "nfs").unwrap().name, "advertises");
        assert_eq!(select_interface(&lifs[..1], "nfs").unwrap().name, "any_up");
    }

    #[test]
    fn test_interface_last_resort_requires_up() {
        let lifs = vec![lif("down", "data", &["cifs"], false)];
        assert!(select_interface(&lifs, "nfs").is_none());
    }
}
