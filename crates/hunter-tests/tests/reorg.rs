//! Reorganisation: a longer fork replaces the best chain atomically, the
//! abandoned branch's transactions come back, and the resulting state is
//! bit-identical to a chain that followed the winning branch from the
//! start.

use hunter_consensus::engine::AcceptOutcome;
use hunter_consensus::storage::ChainStorage;

use hunter_tests::helpers::TestChain;

/// Two chains sharing genesis. `b` runs with offset timestamps so its
/// blocks differ from `a`'s.
fn forked_chains() -> (TestChain, TestChain) {
    let a = TestChain::new();
    let mut b = TestChain::new();
    b.time += 30;
    (a, b)
}

#[test]
fn longer_fork_triggers_reorg_with_identical_end_state() {
    let (mut a, mut b) = forked_chains();

    // Branch A: two blocks carrying a registration at the end.
    a.fund();
    let funding = a.coinbase_outpoint(1);
    let register = a.name_register_tx(b"alice", b"{\"color\":0}", funding);
    a.mine_block_with(&[register.clone()]).unwrap();
    let a_height = a.height();

    // Branch B: the same height plus one, no transactions.
    while b.height() < a_height + 1 {
        b.mine_empty(1);
    }

    // Feed branch B into A. Blocks up to A's height are side-chain; the
    // one beyond it wins.
    let mut outcomes = Vec::new();
    for h in 1..=b.height() {
        let id = b.ctx.index.find_by_height(h).unwrap();
        let hash = b.ctx.index.get(id).hash;
        let block = b.ctx.storage.read_block(&hash).unwrap().unwrap();
        outcomes.push(a.submit(block).unwrap());
    }

    let last = outcomes.pop().unwrap();
    let AcceptOutcome::Reorganized(summary) = last else {
        panic!("expected a reorganisation, got {last:?}");
    };
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, AcceptOutcome::SideChain)));

    // The new tip is B's tip and the registration came back.
    assert_eq!(a.ctx.best_hash(), b.ctx.best_hash());
    assert_eq!(summary.tip, b.ctx.best_hash().unwrap());
    assert!(summary
        .resurrected
        .iter()
        .any(|tx| tx.txid() == register.txid()));

    // Post-reorg state equals the state of a node that was on branch B
    // all along: game world, UTXO aggregate, and name index.
    assert_eq!(a.ctx.current_game_state(), b.ctx.current_game_state());
    assert_eq!(
        a.ctx.storage.utxo_summary().unwrap(),
        b.ctx.storage.utxo_summary().unwrap(),
    );
    assert_eq!(
        a.ctx.storage.name_read(b"alice").unwrap(),
        b.ctx.storage.name_read(b"alice").unwrap(),
    );
    assert!(a.ctx.storage.name_available(b"alice").unwrap());

    // Books balance on the winning branch.
    let analysis = a.ctx.analyse_supply().unwrap();
    assert_eq!(analysis.actual, analysis.expected, "{analysis:?}");
}

#[test]
fn equal_length_fork_does_not_displace_first_seen() {
    let (mut a, mut b) = forked_chains();
    a.mine_empty(2);
    b.mine_empty(2);

    for h in 1..=b.height() {
        let id = b.ctx.index.find_by_height(h).unwrap();
        let hash = b.ctx.index.get(id).hash;
        let block = b.ctx.storage.read_block(&hash).unwrap().unwrap();
        let outcome = a.submit(block).unwrap();
        assert!(matches!(outcome, AcceptOutcome::SideChain), "{outcome:?}");
    }
    assert_ne!(a.ctx.best_hash(), b.ctx.best_hash());
}

#[test]
fn reorg_survives_registered_player_state() {
    // A registration confirmed before the fork point persists across the
    // reorg untouched.
    let (mut a, mut b) = forked_chains();
    a.register_player("carol");

    // Mirror A's blocks into B so both share the registration history.
    for h in 1..=a.height() {
        let id = a.ctx.index.find_by_height(h).unwrap();
        let hash = a.ctx.index.get(id).hash;
        let block = a.ctx.storage.read_block(&hash).unwrap().unwrap();
        let outcome = b.submit(block).unwrap();
        assert!(
            matches!(
                outcome,
                AcceptOutcome::Connected { .. } | AcceptOutcome::Reorganized(_),
            ),
            "{outcome:?}",
        );
    }
    assert_eq!(a.ctx.best_hash(), b.ctx.best_hash());

    // B extends by two, A by one; feeding B's extension reorganises A's.
    b.time = a.time + 30;
    b.mine_empty(2);
    a.mine_empty(1);
    let mut reorged = false;
    for h in (a.height() - 1)..=b.height() {
        let id = b.ctx.index.find_by_height(h).unwrap();
        let hash = b.ctx.index.get(id).hash;
        let block = b.ctx.storage.read_block(&hash).unwrap().unwrap();
        if matches!(a.submit(block).unwrap(), AcceptOutcome::Reorganized(_)) {
            reorged = true;
        }
    }
    assert!(reorged);
    assert_eq!(a.ctx.current_game_state(), b.ctx.current_game_state());
    assert!(a.ctx.current_game_state().players.contains_key("carol"));
}
