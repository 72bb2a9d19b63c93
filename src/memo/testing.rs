use crate::memo::{format_memo, GroupId, Memo};

/// Compares the textual representation of the given memo with the expected one.
pub fn expect_memo(memo: &Memo, expected: &str) {
    let lines: Vec<String> = expected.split('\n').map(String::from).collect();
    let expected = lines.join("\n");

    let buf = format_memo(memo);
    assert_eq!(buf.trim(), expected.trim());
}

/// Checks the number of expressions of the given group.
pub fn expect_group_size(memo: &Memo, group_id: GroupId, size: usize) {
    let group = memo.group(group_id);
    assert_eq!(group.exprs().len(), size, "group#{}", group_id);
}
