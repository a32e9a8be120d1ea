//! Session ID minting: `wf-YYYY-MM-DD-<random-hex>`.

use chrono::Utc;

pub fn new_session_id() -> String {
    let date = Utc::now().format("%Y-%m-%d");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("wf-{date}-{}", &suffix[..12])
}

pub fn new_checkpoint_id() -> String {
    format!("ckpt-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_expected_shape() {
        let id = new_session_id();
        assert!(id.starts_with("wf-"));
        let rest = &id[3..];
        let (date, suffix) = rest.split_at(10);
        assert_eq!(date.len(), 10);
        assert_eq!(&suffix[0..1], "-");
        assert_eq!(suffix.len(), 13);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
