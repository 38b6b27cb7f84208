use std::collections::BTreeMap;

use serve_api::{
    consts,
    inference_service::{Batcher, LoggerSpec},
};

/// Annotations of a component workload, and the sidecars they request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SynthesizedAnnotations {
    pub annotations: BTreeMap<String, String>,
    pub has_logger: bool,
    pub has_batcher: bool,
}

pub fn synthesize(
    annotations: Option<&BTreeMap<String, String>>,
    storage_uri: Option<&str>,
    logger: Option<&LoggerSpec>,
    batcher: Option<&Batcher>,
) -> SynthesizedAnnotations {
    let mut annotations = filter(annotations, consts::SERVICE_ANNOTATION_DISALLOWED_LIST);

    // the serverless platform has no init containers, so the storage initializer
    // is injected by an admission mutator that reads this annotation
    if let Some(storage_uri) = storage_uri {
        annotations.insert(
            consts::ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI.into(),
            storage_uri.into(),
        );
    }

    let has_logger = add_logger_annotations(logger, &mut annotations);
    let has_batcher = add_batcher_annotations(batcher, &mut annotations);

    SynthesizedAnnotations {
        annotations,
        has_logger,
        has_batcher,
    }
}

pub fn filter(
    annotations: Option<&BTreeMap<String, String>>,
    disallowed: &[&str],
) -> BTreeMap<String, String> {
    annotations
        .into_iter()
        .flatten()
        .filter(|(key, _)| !disallowed.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn add_logger_annotations(
    logger: Option<&LoggerSpec>,
    annotations: &mut BTreeMap<String, String>,
) -> bool {
    match logger {
        Some(logger) => {
            annotations.insert(consts::ANNOTATION_LOGGER.into(), "true".into());
            if let Some(url) = &logger.url {
                annotations.insert(consts::ANNOTATION_LOGGER_SINK_URL.into(), url.clone());
            }
            annotations.insert(consts::ANNOTATION_LOGGER_MODE.into(), logger.mode.to_string());
            true
        }
        None => false,
    }
}

pub fn add_batcher_annotations(
    batcher: Option<&Batcher>,
    annotations: &mut BTreeMap<String, String>,
) -> bool {
    match batcher {
        Some(batcher) => {
            annotations.insert(consts::ANNOTATION_BATCHER.into(), "true".into());

            let values = [
                (
                    consts::ANNOTATION_BATCHER_MAX_BATCH_SIZE,
                    batcher.max_batch_size.map(|value| value.get()),
                ),
                (consts::ANNOTATION_BATCHER_MAX_LATENCY, batcher.max_latency),
                (consts::ANNOTATION_BATCHER_TIMEOUT, batcher.timeout),
            ];
            for (key, value) in values {
                if let Some(value) = value {
                    annotations.insert(key.into(), value.to_string());
                }
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use maplit::btreemap;
    use serve_api::inference_service::LoggerType;

    use super::*;

    #[test]
    fn drop_disallowed_annotations() {
        let annotations = btreemap! {
            "autoscaling.knative.dev/minScale".to_string() => "3".to_string(),
            consts::ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI.into() => "gs://stale".into(),
            "kubectl.kubernetes.io/last-applied-configuration".into() => "{}".into(),
            "team".into() => "vision".into(),
        };

        let synthesized = synthesize(Some(&annotations), None, None, None);
        assert_eq!(
            synthesized,
            SynthesizedAnnotations {
                annotations: btreemap! {
                    "team".into() => "vision".into(),
                },
                has_logger: false,
                has_batcher: false,
            },
        );
    }

    #[test]
    fn storage_uri_replaces_user_value() {
        let annotations = btreemap! {
            consts::ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI.to_string() => "gs://stale".to_string(),
        };

        let synthesized = synthesize(Some(&annotations), Some("gs://models/iris"), None, None);
        assert_eq!(
            synthesized.annotations,
            btreemap! {
                consts::ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI.into() => "gs://models/iris".into(),
            },
        );
    }

    #[test]
    fn logger_without_url() {
        let logger = LoggerSpec {
            url: None,
            mode: LoggerType::Request,
        };

        let mut annotations = BTreeMap::default();
        assert!(add_logger_annotations(Some(&logger), &mut annotations));
        assert_eq!(
            annotations,
            btreemap! {
                consts::ANNOTATION_LOGGER.into() => "true".into(),
                consts::ANNOTATION_LOGGER_MODE.into() => "request".into(),
            },
        );
        assert!(!annotations.contains_key(consts::ANNOTATION_LOGGER_SINK_URL));
    }

    #[test]
    fn logger_with_url() {
        let logger = LoggerSpec {
            url: Some("http://message-dumper.default".into()),
            mode: LoggerType::All,
        };

        let mut annotations = BTreeMap::default();
        assert!(add_logger_annotations(Some(&logger), &mut annotations));
        assert_eq!(
            annotations.get(consts::ANNOTATION_LOGGER_SINK_URL).map(String::as_str),
            Some("http://message-dumper.default"),
        );
        assert_eq!(
            annotations.get(consts::ANNOTATION_LOGGER_MODE).map(String::as_str),
            Some("all"),
        );
    }

    #[test]
    fn batcher_encodes_decimals() {
        let batcher = Batcher {
            max_batch_size: NonZeroU32::new(32),
            max_latency: Some(100),
            timeout: Some(60),
        };

        let mut annotations = BTreeMap::default();
        assert!(add_batcher_annotations(Some(&batcher), &mut annotations));
        assert_eq!(
            annotations,
            btreemap! {
                consts::ANNOTATION_BATCHER.into() => "true".into(),
                consts::ANNOTATION_BATCHER_MAX_BATCH_SIZE.into() => "32".into(),
                consts::ANNOTATION_BATCHER_MAX_LATENCY.into() => "100".into(),
                consts::ANNOTATION_BATCHER_TIMEOUT.into() => "60".into(),
            },
        );
    }

    #[test]
    fn empty_batcher_only_enables() {
        let mut annotations = BTreeMap::default();
        assert!(add_batcher_annotations(Some(&Batcher::default()), &mut annotations));
        assert_eq!(
            annotations,
            btreemap! {
                consts::ANNOTATION_BATCHER.into() => "true".into(),
            },
        );
    }

    #[test]
    fn absent_sidecars_add_nothing() {
        let mut annotations = BTreeMap::default();
        assert!(!add_logger_annotations(None, &mut annotations));
        assert!(!add_batcher_annotations(None, &mut annotations));
        assert!(annotations.is_empty());
    }
}
