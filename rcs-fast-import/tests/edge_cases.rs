//! Corner cases of the stream grammar and the replay rules.

use rcs_fast_import as rfi;

mod common;
use common::*;

#[test]
fn quoted_rename_paths_with_whitespace() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 \"my file\"\n\n";
    // The M path is taken verbatim (quoting applies to R/C only), so
    // the file really is named with quotes here; rename it away.
    let (repo, _base) = parse_stream(stream).unwrap();
    let commit = repo.commit_by_mark(2).unwrap();
    match &commit.ops[0] {
        rfi::event::FileOp::Modify { path, .. } => {
            assert_eq!(path.as_slice(), b"\"my file\"");
        }
        other => panic!("unexpected op: {:?}", other),
    }

    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 oldname\n\n\
        commit refs/heads/master\nmark :3\n\
        committer A <a@x> 1 +0000\ndata 3\nc2\n\nfrom :2\nR oldname \"new name\"\n\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    assert_eq!(out.vcs.checkins_of("new name").len(), 1);
    assert!(out.root.join("RCS/new name,v").exists());
}

#[test]
fn passthroughs_are_never_replayed() {
    let stream = "feature done\n\
        blob\nmark :1\ndata 2\na\n\
        progress half way\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 f\n\n\
        done\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    // Only f's check-in, its symbols and the final unlock show up.
    assert_eq!(
        out.vcs
            .calls
            .iter()
            .filter(|c| c.starts_with("ci "))
            .count(),
        1
    );
}

#[test]
fn merge_commit_follows_first_parent_only() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 f\n\n\
        commit refs/heads/topic\nmark :3\n\
        committer A <a@x> 1 +0000\ndata 3\nc2\n\nfrom :2\nM 100644 :1 f\n\n\
        commit refs/heads/master\nmark :4\n\
        committer A <a@x> 2 +0000\ndata 3\nc3\n\nfrom :2\nmerge :3\nM 100644 :1 f\n\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    let revs: Vec<&str> = out
        .vcs
        .checkins_of("f")
        .iter()
        .map(|c| c.rev.as_str())
        .collect();
    // The merge commit extends master from :2, not topic's 1.1.1.1.
    assert_eq!(revs, ["1.1", "1.1.1.1", "1.2"]);
    // The merge parents still round-trip through the envelope.
    let comment = String::from_utf8_lossy(&out.vcs.checkins_of("f")[2].comment).into_owned();
    assert!(comment.contains("Parents: :2, :3\n"));
}

#[test]
fn deleteall_only_touches_the_commits_branch() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 kept\n\n\
        commit refs/heads/topic\nmark :3\n\
        committer A <a@x> 1 +0000\ndata 3\nc2\n\nfrom :2\nM 100644 :1 wiped\n\n\
        commit refs/heads/topic\nmark :4\n\
        committer A <a@x> 2 +0000\ndata 3\nc3\n\nfrom :3\ndeleteall\n\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    let deleted: Vec<&Checkin> = out
        .vcs
        .checkins
        .iter()
        .filter(|c| c.state.as_deref() == Some("Deleted"))
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].file, "wiped");
}

#[test]
fn no_two_checkins_share_a_revision_per_master() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 f\nM 100644 :1 g\n\n\
        commit refs/heads/topic\nmark :3\n\
        committer A <a@x> 1 +0000\ndata 3\nc2\n\nfrom :2\nM 100644 :1 f\nD g\n\n\
        commit refs/heads/master\nmark :4\n\
        committer A <a@x> 2 +0000\ndata 3\nc3\n\nfrom :2\nM 100644 :1 f\nR g h\n\n\
        commit refs/heads/topic\nmark :5\n\
        committer A <a@x> 3 +0000\ndata 3\nc4\n\nfrom :3\nM 100644 :1 f\n\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    let mut seen = std::collections::HashSet::new();
    for c in &out.vcs.checkins {
        assert!(
            seen.insert((c.file.clone(), c.rev.clone())),
            "revision {} of {} checked in twice",
            c.rev,
            c.file
        );
    }
}

#[test]
fn plain_mode_round_trips_raw_comment() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 12\nhello\nworld\n\nM 100644 :1 f\n\n";
    let opts = rfi::Options {
        plain: true,
        ..rfi::Options::default()
    };
    let out = replay_stream(stream, &opts).unwrap();
    assert_eq!(out.vcs.checkins_of("f")[0].comment, b"hello\nworld\n");
}

#[test]
fn copy_onto_existing_master_is_fatal() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> 0 +0000\ndata 3\nc1\n\nM 100644 :1 A\nM 100644 :1 B\n\n\
        commit refs/heads/master\nmark :3\n\
        committer A <a@x> 1 +0000\ndata 3\nc2\n\nfrom :2\nC A B\n\n";
    match replay_stream(stream, &rfi::Options::default()) {
        Err(err) => assert!(err.to_string().contains("already versioned"), "{}", err),
        Ok(_) => panic!("copy onto an existing master must fail"),
    }
}

#[test]
fn rfc822_committer_dates_are_accepted() {
    let stream = "blob\nmark :1\ndata 2\na\n\
        commit refs/heads/master\nmark :2\n\
        committer A <a@x> Sun, 9 Sep 2001 01:46:40 +0000\n\
        data 3\nc1\n\nM 100644 :1 f\n\n";
    let out = replay_stream(stream, &rfi::Options::default()).unwrap();
    let checkin = &out.vcs.checkins_of("f")[0];
    assert_eq!(checkin.date, "2001/09/09 01:46:40");
    // The zone-bearing text is preserved verbatim in the envelope.
    let comment = String::from_utf8_lossy(&checkin.comment).into_owned();
    assert!(comment.contains("Committer-Date: Sun, 9 Sep 2001 01:46:40 +0000\n"));
}
