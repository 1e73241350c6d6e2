//! Ambient-perception source: people around the robot.

use std::sync::Arc;

use serde_json::Value;

use super::{
    error::{SourceError, SourceResult},
    memory::{read_f64, read_flag, read_value, RobotMemory},
    Batch, Fields, Sample,
};

const EXTRACTOR: &str = "PeoplePerception";
const PEOPLE_LIST_KEY: &str = "PeoplePerception/PeopleList";

fn person_key(id: &str, property: &str) -> String {
    format!("PeoplePerception/Person/{}/{}", id, property)
}

pub struct PerceptionSource {
    memory: Arc<dyn RobotMemory>,
}

impl PerceptionSource {
    pub fn new(memory: Arc<dyn RobotMemory>) -> Self {
        Self { memory }
    }

    pub(super) async fn check(&self) -> bool {
        self.memory.is_available().await
    }

    /// Starts the people extractor so the per-person keys get populated.
    pub(super) async fn prepare(&self) -> SourceResult<Vec<Sample>> {
        self.memory
            .subscribe_extractor(EXTRACTOR)
            .await
            .map_err(|source| SourceError::Memory {
                key: EXTRACTOR.to_string(),
                source,
            })?;
        Ok(Vec::new())
    }

    pub(super) async fn sample(&self) -> SourceResult<Batch> {
        let list = read_value(self.memory.as_ref(), PEOPLE_LIST_KEY).await?;
        let ids: Vec<String> = match list {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(id) => id,
                    other => other.to_string(),
                })
                .collect(),
            // An empty list is sometimes stored as null
            Value::Null => Vec::new(),
            other => {
                return Err(SourceError::InvalidFormat {
                    location: PEOPLE_LIST_KEY.to_string(),
                    reason: format!("expected a list of ids, got {}", other),
                })
            }
        };

        let mut batch = Batch::default();
        let mut visible = 0u64;
        let mut faces = 0u64;
        let mut min_distance: Option<f64> = None;
        let mut max_distance: Option<f64> = None;

        for id in &ids {
            match read_flag(self.memory.as_ref(), &person_key(id, "IsVisible")).await {
                Ok(true) => visible += 1,
                Ok(false) => {}
                Err(e) => batch.failures.push(e),
            }
            match read_flag(self.memory.as_ref(), &person_key(id, "IsFaceDetected")).await {
                Ok(true) => faces += 1,
                Ok(false) => {}
                Err(e) => batch.failures.push(e),
            }
            match read_f64(self.memory.as_ref(), &person_key(id, "Distance")).await {
                Ok(distance) => {
                    min_distance = Some(min_distance.map_or(distance, |m| m.min(distance)));
                    max_distance = Some(max_distance.map_or(distance, |m| m.max(distance)));
                }
                Err(e) => batch.failures.push(e),
            }
        }

        let mut fields = Fields::new();
        fields.insert("people_count".into(), Value::from(ids.len() as u64));
        fields.insert("visible_count".into(), Value::from(visible));
        fields.insert("face_detected_count".into(), Value::from(faces));
        if let Some(min) = min_distance {
            fields.insert("min_distance".into(), Value::from(min));
        }
        if let Some(max) = max_distance {
            fields.insert("max_distance".into(), Value::from(max));
        }
        batch.samples.push(Sample::new("people", fields));

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::sources::memory::StaticMemory;

    fn person(memory: &StaticMemory, id: u32, visible: bool, face: bool, distance: f64) {
        let id = id.to_string();
        memory.set(person_key(&id, "IsVisible"), visible);
        memory.set(person_key(&id, "IsFaceDetected"), face);
        memory.set(person_key(&id, "Distance"), distance);
    }

    #[tokio::test]
    async fn counts_people_and_distances() {
        let memory = StaticMemory::new().with(PEOPLE_LIST_KEY, json!([101, 102, 103]));
        person(&memory, 101, true, true, 1.2);
        person(&memory, 102, true, false, 3.5);
        person(&memory, 103, false, false, 0.8);

        let batch = PerceptionSource::new(Arc::new(memory)).sample().await.unwrap();
        let fields = &batch.samples[0].fields;

        assert!(batch.failures.is_empty());
        assert_eq!(batch.samples[0].tag, "people");
        assert_eq!(fields["people_count"], 3);
        assert_eq!(fields["visible_count"], 2);
        assert_eq!(fields["face_detected_count"], 1);
        assert_eq!(fields["min_distance"], 0.8);
        assert_eq!(fields["max_distance"], 3.5);
    }

    #[tokio::test]
    async fn nobody_around_reports_zero_counts() {
        let memory = StaticMemory::new().with(PEOPLE_LIST_KEY, json!([]));
        let batch = PerceptionSource::new(Arc::new(memory)).sample().await.unwrap();
        let fields = &batch.samples[0].fields;

        assert_eq!(fields["people_count"], 0);
        assert_eq!(fields["visible_count"], 0);
        assert!(!fields.contains_key("min_distance"));
        assert!(!fields.contains_key("max_distance"));
    }

    #[tokio::test]
    async fn vanished_person_is_a_partial_failure() {
        let memory = StaticMemory::new().with(PEOPLE_LIST_KEY, json!(["7", "8"]));
        person(&memory, 7, true, true, 2.0);

        let batch = PerceptionSource::new(Arc::new(memory)).sample().await.unwrap();
        assert_eq!(batch.failures.len(), 3);
        assert_eq!(batch.samples[0].fields["people_count"], 2);
        assert_eq!(batch.samples[0].fields["max_distance"], 2.0);
    }

    #[tokio::test]
    async fn unreadable_list_fails_the_source() {
        let missing = PerceptionSource::new(Arc::new(StaticMemory::new()));
        assert!(missing.sample().await.is_err());

        let garbled = StaticMemory::new().with(PEOPLE_LIST_KEY, "nobody");
        assert!(matches!(
            PerceptionSource::new(Arc::new(garbled)).sample().await,
            Err(SourceError::InvalidFormat { .. })
        ));
    }
}
