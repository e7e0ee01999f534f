/*!

This is the long-form manual for `ballot_engine` and `coopvote`.

## How a ballot is cast

A ballot holds exactly one line for every position of the election. A line is either a vote
for an approved candidate of that position or an abstention. A member casts at most one
ballot per election, and a ballot is either stored completely or not at all.

Before anything is written the member goes through four checks, in this order:

1. the member is `ACTIVE`,
2. the election is `VOTING_ACTIVE`,
3. the current time lies in the voting window (both ends included),
4. the member has no ballot in this election yet.

The first failing check is reported. The ballot is then written in one transaction that
claims the (member, election) slot in the `ballot` table. That table has a unique
constraint on the pair, so of two simultaneous submissions only one can succeed; the other
one gets the same "already voted" error as a member who comes back the next day. Each vote
gets a random 64 character receipt token. The transaction also appends a `VOTE_CAST` entry
to the audit log; if that write fails the ballot is rolled back.

## Results

Results are computed from the stored votes on every request. For each position, in display
order:

- `totalVotes` counts votes for approved candidates, abstentions are counted separately,
- each candidate gets `voteCount`, `percentage` (two decimals, 0 when nobody voted) and a
  1-based `rank`; candidates with the same count keep their listing order,
- `branchBreakdown` splits the votes of a candidate by the branch of the voters. Members
  without a branch are grouped under `unassigned`.

Participation rates divide the number of currently active voters by the number of currently
active members. A member deactivated after voting keeps their votes in the counts but is no
longer counted as a participant.

When an election is anonymous, candidates are shown as `Candidate A`, `Candidate B`, ...
following their rank, then `Candidate 27`, `Candidate 28` and so on. Their member id, email,
image, bio and qualifications are removed. Counts are never hidden. Administrators get
`canReveal: true` and can turn the flag off; the next request shows the real names.

## Command line

```text
coopvote [--config FILE] [--database URL] [--verbose] <COMMAND>

  init                                   create the tables
  seed FIXTURE                           load records from a JSON fixture
  cast --member M --election E --vote POS=CAND [--vote POS=]...
  results E [--admin] [--watch] [--polls N] [--reference FILE]
  elections --member M                   elections open to M right now
  kiosk-login --member M
  anonymity E on|off --admin M
  audit E                                audit trail of an election
```

`results --watch` polls the database every `pollIntervalSeconds` and prints the report each
time it changes. With `--reference`, the last report is compared with the JSON in the given
file and a diff is printed if they differ.

## Configuration

The configuration file is JSON. Every field is optional; `--database` overrides the url.

```json
{
  "database": { "url": "sqlite://coopvote.db", "maxConnections": 5 },
  "results": { "pollIntervalSeconds": 5 }
}
```

## Fixture format

`seed` reads the records that the membership and election management side of the portal
owns. Candidates are listed on the ballot in file order.

```json
{
  "branches": [{ "id": "north", "name": "North" }],
  "members": [
    { "id": "alice", "name": "Alice Martin", "email": "alice@coop.example",
      "status": "ACTIVE", "branchId": "north", "role": "MEMBER" }
  ],
  "elections": [
    { "id": "e1", "title": "Board 2026", "description": null,
      "status": "VOTING_ACTIVE", "voteType": "SINGLE_CHOICE",
      "votingStart": "2026-03-01T08:00:00Z", "votingEnd": "2026-03-03T20:00:00Z",
      "isAnonymous": false }
  ],
  "positions": [
    { "id": "chair", "electionId": "e1", "title": "Chair", "description": null, "order": 1 }
  ],
  "candidates": [
    { "id": "c-alice", "electionId": "e1", "positionId": "chair", "memberId": "alice",
      "status": "approved", "image": null, "bio": null, "qualifications": null }
  ]
}
```

Member status is one of `ACTIVE`, `INACTIVE`, `SUSPENDED`, `PENDING`. Election status is one
of `DRAFT`, `ANNOUNCED`, `VOTING_ACTIVE`, `VOTING_CLOSED`, `RESULTS_CERTIFIED`, `CANCELLED`.
Candidate status is one of `pending`, `approved`, `rejected`, `withdrawn`. The vote type is
recorded but every election is counted as single choice.

 */
