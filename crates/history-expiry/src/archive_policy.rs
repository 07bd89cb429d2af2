use history_types::{CoreTransition, PageTransition, VisitRow};

/// Returns true if this visit is worth keeping in the archive. Subframe
/// navigations and intermediate redirect hops are just deleted when they
/// get old.
pub fn should_archive(visit: &VisitRow) -> bool {
    should_archive_transition(visit.transition)
}

pub fn should_archive_transition(transition: PageTransition) -> bool {
    match transition.core() {
        // Always something the user meant to see.
        CoreTransition::Typed | CoreTransition::AutoBookmark | CoreTransition::AutoToplevel => true,

        // Only the final hop of a redirect chain.
        CoreTransition::Link
        | CoreTransition::FormSubmit
        | CoreTransition::Keyword
        | CoreTransition::Generated => transition.is_chain_end(),

        CoreTransition::AutoSubframe
        | CoreTransition::ManualSubframe
        | CoreTransition::Reload
        | CoreTransition::KeywordGenerated => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn transition(core: CoreTransition, qualifiers: u32) -> PageTransition {
        PageTransition::new(core).with_qualifier(qualifiers)
    }

    #[test]
    fn test_always_archived() {
        for core in [CoreTransition::Typed, CoreTransition::AutoBookmark, CoreTransition::AutoToplevel] {
            assert!(should_archive_transition(transition(core, 0)));
            assert!(should_archive_transition(transition(core, PageTransition::SERVER_REDIRECT)));
        }
    }

    #[test]
    fn test_chain_end_required() {
        for core in [
            CoreTransition::Link,
            CoreTransition::FormSubmit,
            CoreTransition::Keyword,
            CoreTransition::Generated,
        ] {
            assert!(!should_archive_transition(transition(core, 0)));
            assert!(!should_archive_transition(transition(core, PageTransition::CHAIN_START)));
            assert!(should_archive_transition(transition(core, PageTransition::CHAIN_END)));
        }
    }

    #[test]
    fn test_subframes_never_archived() {
        for core in [CoreTransition::AutoSubframe, CoreTransition::ManualSubframe] {
            assert!(!should_archive_transition(transition(core, PageTransition::CHAIN_END)));
        }
    }

    proptest! {
        #[test]
        fn decision_depends_only_on_transition(core_idx in 0usize..11, qualifiers in any::<u32>()) {
            let core = CoreTransition::ALL[core_idx];
            let t = transition(core, qualifiers);
            let first = should_archive_transition(t);
            prop_assert_eq!(first, should_archive_transition(t));

            let expected = match core {
                CoreTransition::Typed | CoreTransition::AutoBookmark | CoreTransition::AutoToplevel => true,
                CoreTransition::Link | CoreTransition::FormSubmit | CoreTransition::Keyword | CoreTransition::Generated => {
                    qualifiers & PageTransition::CHAIN_END != 0
                }
                _ => false,
            };
            prop_assert_eq!(first, expected);
        }
    }
}
