//! Translation of the panel's warning and error accumulators into named
//! conditions.
//!
//! The panel ORs negative powers of two into a signed 32-bit accumulator, one
//! flag per physical condition. The flag sets are disjoint, so a greedy
//! decomposition from the largest magnitude down recovers the exact set of
//! active conditions. Should a firmware revision ever introduce overlapping
//! bit meanings this decomposition would silently go wrong; the tables below
//! must track the panel register documentation.

#[derive(Clone, Copy, Debug)]
pub struct Flag {
    pub value: i32,
    pub label: &'static str,
}

const fn flag(value: i32, label: &'static str) -> Flag {
    Flag { value, label }
}

/// Conditions reported in the warning accumulator, in descending magnitude.
pub static WARNING_FLAGS: [Flag; 17] = [
    flag(-524288, "Cold head motor stall"),
    flag(-262144, "Static Pressure running Low"),
    flag(-131072, "Static Pressure running High"),
    flag(-8192, "Delta Pressure running Low"),
    flag(-4096, "Delta Pressure running High"),
    flag(-2048, "High Pressure running Low"),
    flag(-1024, "High Pressure running High"),
    flag(-512, "Low Pressure running Low"),
    flag(-256, "Low Pressure running High"),
    flag(-128, "Helium Temp running Low"),
    flag(-64, "Helium Temp running High"),
    flag(-32, "Oil Temp running Low"),
    flag(-16, "Oil Temp running High"),
    flag(-8, "Coolant OUT Temp running Low"),
    flag(-4, "Coolant OUT Temp running High"),
    flag(-2, "Coolant IN Temp running Low"),
    flag(-1, "Coolant IN Temp running High"),
];

/// Conditions reported in the error accumulator.
///
/// A strict superset of the warning tier: three flags between -16384 and
/// -65536 only ever appear here.
pub static ERROR_FLAGS: [Flag; 20] = [
    flag(-524288, "Cold head motor stall"),
    flag(-262144, "Static Pressure running Low"),
    flag(-131072, "Static Pressure running High"),
    flag(-65536, "Power Supply Error"),
    flag(-32768, "Three Phase Error"),
    flag(-16384, "Motor Current Low"),
    flag(-8192, "Delta Pressure running Low"),
    flag(-4096, "Delta Pressure running High"),
    flag(-2048, "High Pressure running Low"),
    flag(-1024, "High Pressure running High"),
    flag(-512, "Low Pressure running Low"),
    flag(-256, "Low Pressure running High"),
    flag(-128, "Helium Temp running Low"),
    flag(-64, "Helium Temp running High"),
    flag(-32, "Oil Temp running Low"),
    flag(-16, "Oil Temp running High"),
    flag(-8, "Coolant OUT Temp running Low"),
    flag(-4, "Coolant OUT Temp running High"),
    flag(-2, "Coolant IN Temp running Low"),
    flag(-1, "Coolant IN Temp running High"),
];

/// The decoded conditions, in descending flag magnitude.
///
/// Formats as `"None"` when no condition is active, otherwise as the labels
/// joined with `", "` -- the presentation the panel documentation uses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultList(Vec<&'static str>);

impl FaultList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[&'static str] {
        &self.0
    }
}

impl std::fmt::Display for FaultList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("None");
        }
        f.write_str(&self.0.join(", "))
    }
}

impl serde::Serialize for FaultList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Decompose an accumulator against a flag table.
///
/// The table decides which tier applies, so warnings and errors share this
/// one routine. Flags are tried in table order; a flag matches when the
/// remaining accumulator is at least as negative as the flag value.
pub fn decompose(mut accumulator: i32, table: &[Flag]) -> FaultList {
    let mut labels = Vec::new();
    if accumulator == 0 {
        return FaultList(labels);
    }
    for flag in table {
        if accumulator <= flag.value {
            labels.push(flag.label);
            accumulator -= flag.value;
        }
    }
    FaultList(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_accumulator_is_none() {
        let decoded = decompose(0, &WARNING_FLAGS);
        assert!(decoded.is_empty());
        assert_eq!(decoded.to_string(), "None");
    }

    #[test]
    fn single_flag() {
        let decoded = decompose(-1024, &ERROR_FLAGS);
        assert_eq!(decoded.labels(), ["High Pressure running High"]);
        assert_eq!(decoded.to_string(), "High Pressure running High");
    }

    #[test]
    fn combined_flags_present_in_descending_magnitude() {
        let decoded = decompose(-524288 + -16 + -1, &WARNING_FLAGS);
        assert_eq!(
            decoded.to_string(),
            "Cold head motor stall, Oil Temp running High, Coolant IN Temp running High"
        );
    }

    #[test]
    fn error_only_flags_decode_in_the_error_tier() {
        let decoded = decompose(-65536 + -32768 + -16384, &ERROR_FLAGS);
        assert_eq!(
            decoded.labels(),
            ["Power Supply Error", "Three Phase Error", "Motor Current Low"]
        );
    }

    #[test]
    fn every_subset_decomposes_exactly() {
        // Exhaustive subsets are infeasible; sweep every pair and triple of
        // error flags instead, which exercises the same greedy invariant.
        for (i, a) in ERROR_FLAGS.iter().enumerate() {
            for (j, b) in ERROR_FLAGS.iter().enumerate().skip(i + 1) {
                let decoded = decompose(a.value + b.value, &ERROR_FLAGS);
                assert_eq!(decoded.labels(), [a.label, b.label]);
                for c in ERROR_FLAGS.iter().skip(j + 1) {
                    let decoded = decompose(a.value + b.value + c.value, &ERROR_FLAGS);
                    assert_eq!(decoded.labels(), [a.label, b.label, c.label]);
                }
            }
        }
    }

    #[test]
    fn full_accumulator_decodes_every_flag() {
        let sum: i32 = WARNING_FLAGS.iter().map(|f| f.value).sum();
        let decoded = decompose(sum, &WARNING_FLAGS);
        assert_eq!(decoded.labels().len(), WARNING_FLAGS.len());
    }
}
