use vulkanalia::vk::Handle;

/// Takes `handle` out of its slot, leaving null behind.
///
/// Returns `None` when the slot is already null, so release code built on it
/// can run any number of times without freeing a handle twice.
pub fn take<H: Handle + Default>(handle: &mut H) -> Option<H> {
    if handle.is_null() {
        None
    } else {
        Some(std::mem::take(handle))
    }
}

/// Drains every non-null handle out of `handles`, leaving the vector empty.
pub fn drain<H: Handle>(handles: &mut Vec<H>) -> impl Iterator<Item = H> + '_ {
    handles.drain(..).filter(|h| !h.is_null())
}

pub fn is_null_all<H: Handle>(handles: &[H]) -> bool {
    handles.iter().all(|h| h.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulkanalia::vk;

    #[test]
    fn take_nulls_the_slot_once() {
        let mut fence = vk::Fence::from_raw(7);
        assert_eq!(take(&mut fence), Some(vk::Fence::from_raw(7)));
        assert!(fence.is_null());
        assert_eq!(take(&mut fence), None);
    }

    #[test]
    fn drain_skips_null_entries() {
        let mut views = vec![
            vk::ImageView::from_raw(1),
            vk::ImageView::null(),
            vk::ImageView::from_raw(3),
        ];
        let taken: Vec<_> = drain(&mut views).collect();
        assert_eq!(taken.len(), 2);
        assert!(views.is_empty());
        assert!(is_null_all(&views));
    }
}
