//! Exchanged data registry.

use iecgate_core::{ExchangeDataDescriptor, ObjectReference};
use std::collections::HashMap;

/// Configured datapoints indexed by object reference, label and pivot id
#[derive(Debug, Clone, Default)]
pub struct ExchangeData {
    descriptors: Vec<ExchangeDataDescriptor>,
    by_reference: HashMap<ObjectReference, usize>,
    by_label: HashMap<String, usize>,
    by_pivot_id: HashMap<String, usize>,
}

impl ExchangeData {
    pub fn new(descriptors: Vec<ExchangeDataDescriptor>) -> Self {
        let mut by_reference = HashMap::new();
        let mut by_label = HashMap::new();
        let mut by_pivot_id = HashMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            by_reference.insert(descriptor.reference.clone(), index);
            by_label.insert(descriptor.label.clone(), index);
            by_pivot_id.insert(descriptor.pivot_id.clone(), index);
        }

        Self {
            descriptors,
            by_reference,
            by_label,
            by_pivot_id,
        }
    }

    /// Resolve a reference to its configured data object.
    ///
    /// A functional constraint suffix (`[ST]`) and trailing attribute names
    /// (`.stVal`, `.mag.f`) are stripped until a configured object matches.
    pub fn resolve(&self, reference: &str) -> Option<&ExchangeDataDescriptor> {
        let mut candidate = match reference.find('[') {
            Some(bracket) => &reference[..bracket],
            None => reference,
        };

        loop {
            if let Some(index) = self.by_reference.get(candidate) {
                return self.descriptors.get(*index);
            }
            candidate = candidate.rsplit_once('.')?.0;
        }
    }

    pub fn by_label(&self, label: &str) -> Option<&ExchangeDataDescriptor> {
        self.by_label
            .get(label)
            .and_then(|index| self.descriptors.get(*index))
    }

    pub fn by_pivot_id(&self, pivot_id: &str) -> Option<&ExchangeDataDescriptor> {
        self.by_pivot_id
            .get(pivot_id)
            .and_then(|index| self.descriptors.get(*index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangeDataDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iecgate_core::{CommonDataClass, ControlModel};

    fn descriptor(label: &str, reference: &str, cdc: CommonDataClass) -> ExchangeDataDescriptor {
        ExchangeDataDescriptor {
            label: label.to_string(),
            pivot_id: format!("ID-{}", label),
            reference: reference.into(),
            cdc,
            control_model: ControlModel::StatusOnly,
        }
    }

    #[test]
    fn test_lookups() {
        let data = ExchangeData::new(vec![
            descriptor("TM1", "simpleIOGenericIO/GGIO1.AnIn1", CommonDataClass::MvTyp),
            descriptor("TS1", "simpleIOGenericIO/GGIO1.Ind1", CommonDataClass::SpsTyp),
        ]);

        assert_eq!(data.len(), 2);
        assert_eq!(data.by_label("TS1").unwrap().cdc, CommonDataClass::SpsTyp);
        assert_eq!(data.by_pivot_id("ID-TM1").unwrap().label, "TM1");
        assert!(data.by_label("TS9").is_none());
    }

    #[test]
    fn test_resolve_strips_attributes() {
        let data = ExchangeData::new(vec![descriptor(
            "TM1",
            "simpleIOGenericIO/GGIO1.AnIn1",
            CommonDataClass::MvTyp,
        )]);

        for reference in [
            "simpleIOGenericIO/GGIO1.AnIn1",
            "simpleIOGenericIO/GGIO1.AnIn1.mag.f",
            "simpleIOGenericIO/GGIO1.AnIn1.mag.f[MX]",
        ] {
            assert_eq!(data.resolve(reference).unwrap().label, "TM1", "{}", reference);
        }

        assert!(data.resolve("simpleIOGenericIO/GGIO1.AnIn2.mag.f").is_none());
        assert!(data.resolve("simpleIOGenericIO/GGIO1").is_none());
        assert!(data.resolve("unrelated").is_none());
    }
}
