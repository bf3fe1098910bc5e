use crate::error::{Result, VggError};

/// Number of down-sampling stages in every VGG network.
pub const NUM_STAGES: usize = 5;

/// Named stage configurations, each entry giving the convolution sub-blocks per stage.
///
/// The second name of each row is the historical alias used by older configs.
static PRESETS: [(&str, &str, [usize; NUM_STAGES]); 2] = [
    ("16-layer", "vgg16", [2, 2, 3, 3, 3]),
    ("19-layer", "vgg19", [2, 2, 4, 4, 4]),
];

/// Resolves a preset name to its stage configuration.
pub fn lookup(name: &str) -> Result<[usize; NUM_STAGES]> {
    PRESETS
        .iter()
        .find(|(canonical, alias, _)| *canonical == name || *alias == name)
        .map(|(_, _, stages)| *stages)
        .ok_or_else(|| VggError::UnknownPreset {
            name: name.to_string(),
            known: names().collect::<Vec<_>>().join(", "),
        })
}

/// Canonical preset names.
pub fn names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(canonical, _, _)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("16-layer", [2, 2, 3, 3, 3])]
    #[case("19-layer", [2, 2, 4, 4, 4])]
    #[case("vgg16", [2, 2, 3, 3, 3])]
    #[case("vgg19", [2, 2, 4, 4, 4])]
    fn known_presets_resolve(#[case] name: &str, #[case] expected: [usize; NUM_STAGES]) {
        assert_eq!(lookup(name).unwrap(), expected);
    }

    #[test]
    fn unknown_preset_is_a_lookup_error() {
        let err = lookup("11-layer").unwrap_err();

        match err {
            VggError::UnknownPreset { name, known } => {
                assert_eq!(name, "11-layer");
                assert_eq!(known, "16-layer, 19-layer");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
