use sentinel_types::ReorderedTask;

/// Lays `tasks` out in the order given by `order`. Indices past the end of
/// `tasks` produce a row with no task instead of failing.
pub fn apply_task_order(tasks: &[String], order: &[usize]) -> Vec<ReorderedTask> {
    order
        .iter()
        .enumerate()
        .map(|(position, &source_index)| ReorderedTask {
            position,
            source_index,
            task: tasks.get(source_index).cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> Vec<String> {
        ["A", "B", "C"].into_iter().map(String::from).collect()
    }

    #[test]
    fn reorders_by_index() {
        let rows = apply_task_order(&tasks(), &[2, 0]);
        let names = rows
            .iter()
            .map(|r| r.task.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![Some("C"), Some("A")]);
        assert!(rows[0].moved());
        assert!(rows[1].moved());
    }

    #[test]
    fn out_of_range_index_is_reported_missing() {
        let rows = apply_task_order(&tasks(), &[5]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_index, 5);
        assert_eq!(rows[0].task, None);
        assert!(!rows[0].moved());
    }

    #[test]
    fn unchanged_position_is_not_marked_moved() {
        let rows = apply_task_order(&tasks(), &[0, 2]);
        assert!(!rows[0].moved());
        assert!(rows[1].moved());
    }
}
